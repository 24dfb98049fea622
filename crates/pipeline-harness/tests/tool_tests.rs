//! Build-tool entry points, with shell scripts standing in for the tool.
//!
//! Each script waits for a trigger file before printing, so expectations are
//! always registered before the output they describe.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use pipeline_harness::logging;
use pipeline_harness::prelude::*;
use pipeline_harness::{ProcessExitStatus, Stream};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(10);

const TYPE_ERROR: &str =
    "Argument of type '\"1\"' is not assignable to parameter of type 'number'";

const CHECKER: &str = r#"
while [ ! -f go ]; do sleep 0.05; done
printf '[at-loader] Checking finished with 1 errors\n' >&2
sleep 0.1
printf "ERROR in [at-loader] src/index.ts:3:3 \n    TS2345: Argument of type '\"1\"' is not assignable to parameter of type 'number'.\n"
while [ ! -f stop ]; do sleep 0.05; done
"#;

const NOISY: &str = r"
while [ ! -f go ]; do sleep 0.05; done
printf 'Hash: 3f1c2a\n'
sleep 30
";

const BUILD: &str = r#"
[ "$1" = "--config" ] || exit 64
[ -f "$2" ] || exit 65
mkdir -p out
printf 'exports.answer =\n    42;\n' > out/index.js
printf 'Hash: 1\nERROR in ./src/index.ts\n    TS2345: bad argument\nTime: 3ms\n'
exit 2
"#;

const WATCHER: &str = r#"
[ "$3" = "--watch" ] || exit 64
n=0
while [ $n -lt 2 ]; do
    while [ ! -f "trigger$n" ]; do sleep 0.05; done
    n=$((n+1))
    printf "build $n\nTime: ${n}0ms\n"
done
while [ ! -f trigger2 ]; do sleep 0.05; done
printf 'giving up\n' >&2
exit 3
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    path
}

fn config(root: &Path, script: &Path) -> HarnessConfig {
    HarnessConfig::new()
        .test_root(root.join("runs"))
        .loader(root.join("loader/index.js"))
        .tool("sh", script)
        .echo_output(false)
        .expect_timeout(WAIT)
}

#[tokio::test]
async fn exec_matches_a_type_check_failure() {
    logging::init();
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), &write_script(root.path(), "checker.sh", CHECKER));

    spec("tests/tool_tests.rs", &config, |env| async move {
        env.src("index.ts", "function f(a: number) {}\nf('1');\n")?;
        let tool = exec(&env, ["--config", "webpack.config.js"])?;

        let checked = tool.wait([
            stderr("Checking finished with 1 errors"),
            stdout(["ERROR in [at-loader]", TYPE_ERROR]),
        ]);
        assert_eq!(tool.pending(), 1);
        env.file("go", "")?;
        checked.within(WAIT).await?;
        assert_eq!(tool.pending(), 0);

        env.file("stop", "")?;
        let status = tool.alive().with_timeout(WAIT).await.map_err(|_| {
            HarnessError::timeout(WAIT, "the checker to exit")
        })?;
        assert!(status.success());
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn exec_rejects_unanticipated_output() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), &write_script(root.path(), "noisy.sh", NOISY));

    let err = spec("noisy", &config, |env| async move {
        let tool = exec(&env, Vec::<String>::new())?;
        let ready = tool.wait([stdout("bundle is now VALID")]);
        env.file("go", "")?;
        let outcome = ready.within(WAIT).await;
        tool.close();
        outcome
    })
    .await
    .unwrap_err();

    assert_eq!(err.unexpected(), Some((Stream::Stdout, "Hash: 3f1c2a\n")));
    let message = err.to_string();
    assert!(message.contains("stdout") && message.contains("Hash: 3f1c2a"), "{message}");
}

#[tokio::test]
async fn closing_leaves_expectations_to_the_caller() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), &write_script(root.path(), "noisy.sh", NOISY));

    spec("close", &config, |env| async move {
        let tool = exec(&env, Vec::<String>::new())?;
        let pending = tool.wait([stdout("never")]);
        tool.close();
        tool.close();
        tool.alive().with_timeout(WAIT).await.map_err(|_| HarnessError::timeout(WAIT, "exit"))?;

        assert_eq!(tool.pending(), 1);
        assert_eq!(tool.cancel_pending("tool closed"), 1);
        assert!(matches!(pending.await, Err(HarnessError::Cancelled { .. })));
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn compile_reports_errors_and_output() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), &write_script(root.path(), "build.sh", BUILD));

    spec("compile", &config, |env| async move {
        env.src("index.ts", "export const answer = 42;")?;
        env.tsconfig(Some(json!({ "noImplicitAny": true })), None)?;
        let tool_config = compose(
            &base_config(&env),
            [query(&env, json!({ "useBabel": false })), merge(json!({ "bail": true }))],
        );

        let report = compile(&env, &tool_config).await?;
        assert_eq!(report.status, Some(ProcessExitStatus::Exited(2)));
        assert!(!report.success());
        expect_errors(&report, 1, &["TS2345"])?;
        check_output(&env, None, "exports.answer = 42;")?;
        assert!(read_output(&env, Some("missing.js")).is_err());

        let written = std::fs::read_to_string(env.config_path())?;
        assert!(written.contains("\"bail\": true"));
        assert!(written.contains("module.exports = config;"));
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn watch_broadcasts_each_rebuild() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), &write_script(root.path(), "watcher.sh", WATCHER));

    spec("watch", &config, |env| async move {
        let tool = watch(&env, &base_config(&env))?;

        let first = tool.wait();
        let second = tool.wait();
        assert_eq!(tool.pending(), 2);
        env.file("trigger0", "")?;
        for waiter in [first, second] {
            let report = waiter.with_timeout(WAIT).await.map_err(|_| {
                HarnessError::timeout(WAIT, "the first build")
            })??;
            assert!(report.stdout.contains("build 1"));
            assert!(report.status.is_none());
        }
        assert_eq!(tool.pending(), 0);

        let rebuild = tool.wait();
        env.file("trigger1", "")?;
        let report = rebuild.with_timeout(WAIT).await.map_err(|_| {
            HarnessError::timeout(WAIT, "the rebuild")
        })??;
        assert!(report.stdout.contains("build 2"));
        assert!(!report.stdout.contains("build 1"));

        let last = tool.wait();
        env.file("trigger2", "")?;
        match last.with_timeout(WAIT).await {
            Ok(Err(HarnessError::Compile { message })) => {
                assert!(message.contains("closed its output"), "{message}");
                assert!(message.contains("giving up"), "{message}");
            }
            other => panic!("expected the watch to fail, got {other:?}"),
        }
        tool.close();
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn closing_a_watch_fails_pending_waiters() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), &write_script(root.path(), "watcher.sh", WATCHER));

    spec("watch-close", &config, |env| async move {
        let tool = watch(&env, &base_config(&env))?;
        let waiter = tool.wait();
        tool.close();
        let outcome = waiter.with_timeout(WAIT).await.map_err(|_| {
            HarnessError::timeout(WAIT, "the watch to close")
        })?;
        assert!(matches!(outcome, Err(HarnessError::Compile { .. })));
        Ok(())
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn watch_refuses_a_boundary_that_matches_nothing() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), &write_script(root.path(), "watcher.sh", WATCHER))
        .build_boundary("(?m)^");

    let err = spec("watch-boundary", &config, |env| async move {
        watch(&env, &base_config(&env)).map(|_| ())
    })
    .await
    .unwrap_err();
    assert!(matches!(err, HarnessError::EmptyBoundary { .. }), "{err}");
}

#[tokio::test]
async fn spawn_failures_surface_from_exec() {
    let root = tempfile::tempdir().unwrap();
    let config = config(root.path(), Path::new("unused.sh")).tool("no-such-node-binary", "x.js");

    let err = spec("spawn-failure", &config, |env| async move {
        exec(&env, Vec::<String>::new()).map(|_| ())
    })
    .await
    .unwrap_err();
    assert!(matches!(err, HarnessError::Spawn(_)));
}
