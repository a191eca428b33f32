use std::sync::{Arc, Mutex};
use std::time::Duration;

use memofs::{CallError, Error, Function, Options, Value};

use crate::utils::*;

/// `function (a, b, cb) { cb(null, a + b, a * b) }`
fn sum_and_product(calls: &Calls) -> Function {
    let calls = calls.clone();
    Function::sync("function (a, b, cb) { cb(null, a + b, a * b) }", 3, move |mut args| {
        calls.hit();
        let cb = args.pop().unwrap();
        let nums = number_args(&args);
        let cb = cb.as_function().unwrap();
        cb.call(vec![
            Value::Null,
            Value::from(nums[0] + nums[1]),
            Value::from(nums[0] * nums[1]),
        ])?;
        Ok(Value::Undefined)
    })
}

/// A callback that records its arguments and returns the first result.
fn recording_callback(seen: &Arc<Mutex<Vec<Vec<Value>>>>) -> Function {
    let seen = seen.clone();
    Function::sync("function (err, sum, product) { return sum }", 3, move |args| {
        let first = args.get(1).cloned().unwrap_or_default();
        seen.lock().unwrap().push(args);
        Ok(first)
    })
}

#[tokio::test]
async fn test_errback_miss_and_hit() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let calls = Calls::default();
    let seen = Arc::default();

    let memoized = memoize
        .fn_(sum_and_product(&calls), Options::default())
        .await
        .unwrap();

    let args = || vec![2.into(), 3.into(), recording_callback(&seen).into()];
    let result = memoized.call(args()).await.unwrap();
    assert_eq!(result, Value::from(5));
    assert_eq!(memoize.cache_hit(), Some(false));
    insta::assert_snapshot!(read_single_cache_file(cache_dir.path()), @r#"{"data":[null,5,6]}"#);

    let result = memoized.call(args()).await.unwrap();
    assert_eq!(result, Value::from(5));
    assert_eq!(memoize.cache_hit(), Some(true));
    assert_eq!(calls.count(), 1);

    let seen = seen.lock().unwrap();
    let expected = vec![Value::Null, Value::from(5), Value::from(6)];
    assert_eq!(*seen, vec![expected.clone(), expected]);
}

#[tokio::test]
async fn test_errback_error_is_not_cached() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let seen = Arc::default();

    let target = Function::sync("function (cb) { cb(new Error('qux')) }", 1, |args| {
        let cb = args[0].as_function().unwrap();
        cb.call(vec![CallError::new("qux").value().clone()])?;
        Ok(Value::Undefined)
    });
    let memoized = memoize.fn_(target, Options::default()).await.unwrap();

    let err = memoized
        .call(vec![recording_callback(&seen).into()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Execution(ref e) if e.message() == "qux"));
    assert_eq!(memoize.cache_hit(), None);
    assert!(cache_files(cache_dir.path()).is_empty());
    // the caller's callback is not invoked for errors
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_errback_called_later() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let seen = Arc::default();

    let source = "function (a, cb) { setTimeout(() => cb(null, a), 10) }";
    let target = Function::sync(source, 2, |args| {
        let value = args[0].clone();
        let cb = args[1].as_function().unwrap().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cb.call(vec![Value::Null, value]).ok();
        });
        Ok(Value::Undefined)
    });
    let memoized = memoize.fn_(target, Options::default()).await.unwrap();

    let result = memoized
        .call(vec!["later".into(), recording_callback(&seen).into()])
        .await
        .unwrap();
    assert_eq!(result, Value::from("later"));
    insta::assert_snapshot!(read_single_cache_file(cache_dir.path()), @r#"{"data":[null,"later"]}"#);
}

#[tokio::test]
async fn test_errback_from_future() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let seen = Arc::default();

    let source = "async function (cb) { await tick(); cb(null, 1) }";
    let target = Function::future(source, 1, |args| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        args[0].as_function().unwrap().call(vec![Value::Null, 1.into()])?;
        Ok(Value::Undefined)
    });
    let memoized = memoize.fn_(target, Options::default()).await.unwrap();

    let result = memoized
        .call(vec![recording_callback(&seen).into()])
        .await
        .unwrap();
    assert_eq!(result, Value::from(1));
}

#[tokio::test]
async fn test_errback_target_throws() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let seen = Arc::default();

    let target = Function::sync("function (cb) { throw new Error('qux') }", 1, |_| {
        Err(CallError::new("qux"))
    });
    let memoized = memoize.fn_(target, Options::default()).await.unwrap();

    let err = memoized
        .call(vec![recording_callback(&seen).into()])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "qux");
    assert!(cache_files(cache_dir.path()).is_empty());
}

#[tokio::test]
async fn test_errback_never_called() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let seen = Arc::default();

    let target = Function::sync("function (cb) {}", 1, |_| Ok(Value::Undefined));
    let memoized = memoize.fn_(target, Options::default()).await.unwrap();

    let err = memoized
        .call(vec![recording_callback(&seen).into()])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CallbackDropped));
    assert!(cache_files(cache_dir.path()).is_empty());
}

#[tokio::test]
async fn test_zero_arity_callback_is_an_argument() {
    setup();
    let cache_dir = tempdir();
    let memoize = memoizer(cache_dir.path());
    let calls = Calls::default();

    let thunk = Function::sync("() => 1", 0, |_| Ok(1.into()));
    let target = returning("function (f) { return 'direct' }", "direct".into(), &calls);
    let memoized = memoize.fn_(target, Options::default()).await.unwrap();

    let result = memoized.call(vec![thunk.into()]).await.unwrap();
    assert_eq!(result, Value::from("direct"));
    insta::assert_snapshot!(read_single_cache_file(cache_dir.path()), @r#"{"data":"direct"}"#);
}
