use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use memofs::serialize;
use memofs::{
    DecodeError, DeserializeFn, Error, Memoizer, MemoizerConfig, Options, SerializeFn, Value,
};

use crate::utils::*;

#[tokio::test]
async fn test_no_body() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let no_body = Options {
        no_body: Some(true),
        ..Default::default()
    };

    let first = Calls::default();
    let memoized = memoize
        .fn_(returning("() => 'one'", "one".into(), &first), no_body.clone())
        .await
        .unwrap();
    assert_eq!(memoized.call(vec![]).await.unwrap(), Value::from("one"));

    let second = Calls::default();
    let memoized = memoize
        .fn_(returning("() => 'two'", "two".into(), &second), no_body)
        .await
        .unwrap();
    assert_eq!(memoized.call(vec![]).await.unwrap(), Value::from("one"));
    assert_eq!(second.count(), 0);
}

#[tokio::test]
async fn test_ast_body() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let ast_body = Options {
        ast_body: Some(true),
        ..Default::default()
    };

    let calls = Calls::default();
    let memoized = memoize
        .fn_(returning("function () { return 'a' }", "a".into(), &calls), ast_body.clone())
        .await
        .unwrap();
    assert_eq!(memoized.call(vec![]).await.unwrap(), Value::from("a"));

    // formatting and comments do not matter
    let reformatted = returning(
        "function(){\n  // the letter a\n  return 'a'\n}",
        "b".into(),
        &calls,
    );
    let memoized = memoize.fn_(reformatted.clone(), ast_body).await.unwrap();
    assert_eq!(memoized.call(vec![]).await.unwrap(), Value::from("a"));
    assert_eq!(memoize.cache_hit(), Some(true));

    // but they do for the source text
    let memoized = memoize.fn_(reformatted, Options::default()).await.unwrap();
    assert_eq!(memoized.call(vec![]).await.unwrap(), Value::from("b"));
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn test_ast_body_parse_error() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let ast_body = Options {
        ast_body: Some(true),
        ..Default::default()
    };

    let calls = Calls::default();
    let memoized = memoize
        .fn_(returning("function () { return (1", 1.into(), &calls), ast_body)
        .await
        .unwrap();

    let err = memoized.call(vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Parse(_)));
    assert_eq!(calls.count(), 0);
}

#[tokio::test]
async fn test_salt() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let calls = Calls::default();

    for salt in ["a", "b", "a"] {
        let salted = Options {
            salt: Some(salt.into()),
            ..Default::default()
        };
        let memoized = memoize.fn_(sum_plus(3.0, &calls), salted).await.unwrap();
        memoized.call(vec![1.into(), 2.into()]).await.unwrap();
    }

    assert_eq!(calls.count(), 2);
    assert_eq!(cache_files(cache_dir.path()).len(), 2);
}

#[tokio::test]
async fn test_retry_on_invalid_cache() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let calls = Calls::default();

    let memoized = memoize
        .fn_(sum_plus(3.0, &calls), Options::default())
        .await
        .unwrap();
    memoized.call(vec![1.into(), 2.into()]).await.unwrap();

    let path = memoize
        .cache_file_path(&sum_plus(3.0, &calls), &[1.into(), 2.into()], &Options::default())
        .unwrap();
    fs::write(&path, "}{").unwrap();

    // without retrying, the broken entry reads as undefined
    assert_eq!(memoized.call(vec![1.into(), 2.into()]).await.unwrap(), Value::Undefined);
    assert_eq!(memoize.cache_hit(), Some(true));
    assert_eq!(calls.count(), 1);

    let retrying = Options {
        retry_on_invalid_cache: Some(true),
        ..Default::default()
    };
    let memoized = memoize.fn_(sum_plus(3.0, &calls), retrying).await.unwrap();
    assert_eq!(memoized.call(vec![1.into(), 2.into()]).await.unwrap(), Value::from(6));
    assert_eq!(memoize.cache_hit(), Some(false));
    assert_eq!(calls.count(), 2);
    assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"data":6}"#);
}

#[tokio::test]
async fn test_non_utf8_cache_file() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let calls = Calls::default();
    let retrying = Options {
        retry_on_invalid_cache: Some(true),
        ..Default::default()
    };

    let path = memoize
        .cache_file_path(&sum_plus(3.0, &calls), &[1.into(), 2.into()], &retrying)
        .unwrap();
    let memoized = memoize.fn_(sum_plus(3.0, &calls), retrying).await.unwrap();
    fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

    assert_eq!(memoized.call(vec![1.into(), 2.into()]).await.unwrap(), Value::from(6));
    assert_eq!(calls.count(), 1);
}

fn prefixed_codec() -> Options {
    let encode: SerializeFn =
        Arc::new(|value: &Value| format!("v1:{}", serialize::serialize(value)));
    let decode: DeserializeFn = Arc::new(|text: &str| {
        let json = text
            .strip_prefix("v1:")
            .ok_or_else(|| DecodeError("missing version prefix".into()))?;
        serialize::deserialize(json)
    });

    Options {
        serialize: Some(encode),
        deserialize: Some(decode),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_custom_codec() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let calls = Calls::default();

    let result = Value::object([("list", Value::Array(vec![1.into(), 2.into()]))]);
    let memoized = memoize
        .fn_(returning("() => result", result.clone(), &calls), prefixed_codec())
        .await
        .unwrap();

    assert_eq!(memoized.call(vec![]).await.unwrap(), result);
    insta::assert_snapshot!(read_single_cache_file(cache_dir.path()), @r#"v1:{"data":{"list":[1,2]}}"#);

    assert_eq!(memoized.call(vec![]).await.unwrap(), result);
    assert_eq!(memoize.cache_hit(), Some(true));
    assert_eq!(calls.count(), 1);

    // the serializer also feeds the cache key
    let default_path = memoize
        .cache_file_path(&returning("() => result", Value::Null, &calls), &[], &Options::default())
        .unwrap();
    let custom_path = memoize
        .cache_file_path(&returning("() => result", Value::Null, &calls), &[], &prefixed_codec())
        .unwrap();
    assert_ne!(default_path, custom_path);
}

#[tokio::test]
async fn test_unpaired_codec_is_rejected() {
    setup();
    let cache_dir = tempdir();

    let mut config = MemoizerConfig::new(cache_dir.path());
    config.options.serialize = prefixed_codec().serialize;
    let err = Memoizer::new(config).unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let memoize = memoizer(cache_dir.path());
    let calls = Calls::default();
    let unpaired = Options {
        deserialize: prefixed_codec().deserialize,
        ..Default::default()
    };
    let err = memoize.fn_(sum_plus(3.0, &calls), unpaired).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_zero_max_age_is_rejected() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let calls = Calls::default();

    let options = Options {
        max_age: Some(Duration::ZERO),
        ..Default::default()
    };
    let err = memoize.fn_(sum_plus(3.0, &calls), options).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn test_cache_id_on_a_file() {
    setup();
    let cache_dir = tempdir();
    fs::write(cache_dir.path().join("README.md"), "# not a directory").unwrap();
    let calls = Calls::default();

    let memoize = memoizer(cache_dir.path());
    let err = memoize
        .fn_(sum_plus(3.0, &calls), cache_id("README.md"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Namespace { .. }));

    let mut config = MemoizerConfig::new(cache_dir.path());
    config.options.throw_error = Some(false);
    let memoize = Memoizer::new(config).unwrap();
    let memoized = memoize
        .fn_(sum_plus(3.0, &calls), cache_id("README.md"))
        .await
        .unwrap();

    // writing into the file fails later on
    let err = memoized.call(vec![1.into(), 2.into()]).await.unwrap_err();
    assert!(matches!(err, Error::Read { .. } | Error::Write { .. }));
}

#[tokio::test]
async fn test_invalid_cache_path() {
    setup();
    let cache_dir = tempdir();
    let file = cache_dir.path().join("file");
    fs::write(&file, "").unwrap();
    let calls = Calls::default();

    let memoize = memoizer(&file.join("cache"));
    let err = memoize
        .fn_(sum_plus(3.0, &calls), cache_id("foobar"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Namespace { .. }));
}

#[tokio::test]
async fn test_write_error_is_returned() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let calls = Calls::default();

    let forced = Options {
        cache_id: Some("foobar".into()),
        force: Some(true),
        ..Default::default()
    };
    let path = memoize
        .cache_file_path(&returning("() => 1", 1.into(), &calls), &[], &forced)
        .unwrap();
    let memoized = memoize
        .fn_(returning("() => 1", 1.into(), &calls), forced)
        .await
        .unwrap();
    // a directory in place of the cache file cannot be written
    fs::create_dir(&path).unwrap();

    let err = memoized.call(vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Write { .. }));
    assert_eq!(calls.count(), 1);
    assert_eq!(memoize.cache_hit(), None);

    // without force, reading the directory fails as well
    let err = memoized.call(vec![]).await.unwrap_err();
    assert!(matches!(err, Error::Read { .. }));
    assert_ne!(err.io_kind(), Some(io::ErrorKind::NotFound));
}

#[tokio::test]
async fn test_memoizer_from_config_file() {
    setup();
    let cache_dir = tempdir();
    let config_path = cache_dir.path().join("memofs.yml");
    let cache_path = cache_dir.path().join("cache");
    fs::write(
        &config_path,
        format!(
            "cache_path: {}\ncache_id: reports\nsalt: v2\n",
            cache_path.display()
        ),
    )
    .unwrap();

    let config = MemoizerConfig::get(Some(&config_path)).unwrap();
    let memoize = Memoizer::new(config).unwrap();
    let calls = Calls::default();

    let memoized = memoize
        .fn_(sum_plus(3.0, &calls), Options::default())
        .await
        .unwrap();
    assert_eq!(memoized.options().salt, "v2");
    memoized.call(vec![1.into(), 2.into()]).await.unwrap();

    assert_eq!(cache_files(cache_path.join("reports")).len(), 1);
}

#[tokio::test]
async fn test_per_call_options_override_defaults() {
    setup();
    let cache_dir = tempdir();
    let mut config = MemoizerConfig::new(cache_dir.path());
    config.options.cache_id = Some("outer".into());
    let memoize = Memoizer::new(config).unwrap();
    let calls = Calls::default();

    let outer = memoize
        .fn_(sum_plus(3.0, &calls), Options::default())
        .await
        .unwrap();
    outer.call(vec![1.into(), 2.into()]).await.unwrap();

    let inner = memoize
        .fn_(sum_plus(3.0, &calls), cache_id("inner"))
        .await
        .unwrap();
    inner.call(vec![1.into(), 2.into()]).await.unwrap();

    assert_eq!(cache_files(cache_dir.path().join("outer")).len(), 1);
    assert_eq!(cache_files(cache_dir.path().join("inner")).len(), 1);
    assert_eq!(calls.count(), 2);
}
