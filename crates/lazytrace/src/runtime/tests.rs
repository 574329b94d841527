use super::*;
use crate::hook::{HookOptions, HookRegistration, Transform};
use crate::matcher::MatchFn;
use std::fs;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        for (name, text) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, text).unwrap();
        }
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn host(&self) -> ScriptHost {
        ScriptHost::with_cwd(self.dir.path())
            .unwrap()
            .with_captured_output()
    }

    fn run(&self, host: &ScriptHost, main: &str) -> i32 {
        let argv = vec!["lazytrace".to_string(), main.to_string()];
        host.run_main(&self.path(main), &argv).unwrap()
    }
}

fn all_paths() -> MatchFn {
    Rc::new(|_: &Path| true)
}

fn replacing(from: &'static str, to: &'static str) -> Rc<dyn Transform> {
    Rc::new(move |s: &str, _: &Path| -> TraceResult<String> { Ok(s.replace(from, to)) })
}

#[test]
fn test_relative_require_and_console() {
    let fx = Fixture::new(&[
        ("main.js", "var b = require('./lib/b');\nconsole.log(b.add(2, 3));\n"),
        ("lib/b.js", "exports.add = function (a, b) { return a + b; };\n"),
    ]);
    let host = fx.host();
    assert_eq!(fx.run(&host, "main.js"), 0);
    assert_eq!(host.captured_output(), "5\n");
}

#[test]
fn test_cyclic_require_sees_partial_exports() {
    let fx = Fixture::new(&[
        (
            "a.js",
            "exports.early = 1;\nvar b = require('./b');\nexports.late = 2;\nconsole.log(b.sawEarly, b.sawLate);\n",
        ),
        ("b.js", "var a = require('./a');\nexports.sawEarly = a.early;\nexports.sawLate = a.late;\n"),
    ]);
    let host = fx.host();
    assert_eq!(fx.run(&host, "a.js"), 0);
    assert_eq!(host.captured_output(), "1 undefined\n");
}

#[test]
fn test_json_and_require_main() {
    let fx = Fixture::new(&[
        (
            "main.js",
            "var cfg = require('./cfg.json');\nconsole.log(cfg.name, require.main === module);\n",
        ),
        ("cfg.json", r#"{"name": "demo"}"#),
    ]);
    let host = fx.host();
    fx.run(&host, "main.js");
    assert_eq!(host.captured_output(), "demo true\n");
}

#[test]
fn test_process_exit_cannot_be_caught() {
    let fx = Fixture::new(&[(
        "main.js",
        "try { process.exit(3); } catch (e) { console.log('caught'); }\nconsole.log('after');\n",
    )]);
    let host = fx.host();
    assert_eq!(fx.run(&host, "main.js"), 3);
    assert_eq!(host.captured_output(), "");
}

#[test]
fn test_uncaught_exception_exits_one() {
    let fx = Fixture::new(&[("main.js", "throw new Error('boom');\n")]);
    let host = fx.host();
    assert_eq!(fx.run(&host, "main.js"), 1);
    assert!(host.captured_output().contains("Uncaught Error: boom"));
}

#[test]
fn test_exit_code_and_listeners() {
    let fx = Fixture::new(&[(
        "main.js",
        "process.on('exit', function (code) { console.log('bye ' + code); });\nprocess.exitCode = 4;\n",
    )]);
    let host = fx.host();
    assert_eq!(fx.run(&host, "main.js"), 4);
    assert_eq!(host.captured_output(), "bye 4\n");
}

#[test]
fn test_argv_is_passed_through() {
    let fx = Fixture::new(&[("main.js", "console.log(process.argv.join(','));\n")]);
    let host = fx.host();
    let argv = vec!["lazytrace".to_string(), "main.js".to_string(), "--flag".to_string()];
    host.run_main(&fx.path("main.js"), &argv).unwrap();
    assert_eq!(host.captured_output(), "lazytrace,main.js,--flag\n");
}

#[test]
fn test_run_in_this_context_evaluates_globally() {
    let fx = Fixture::new(&[(
        "main.js",
        "var vm = require('vm');\nvar r = vm.runInThisContext('var g = 40; g + 2', 'x.js');\nconsole.log(r, typeof g);\n",
    )]);
    let host = fx.host();
    fx.run(&host, "main.js");
    assert_eq!(host.captured_output(), "42 number\n");
}

#[test]
fn test_hashbang_main_runs() {
    let fx = Fixture::new(&[("main.js", "#!/usr/bin/env node\nconsole.log(typeof require);\n")]);
    let host = fx.host();
    assert_eq!(fx.run(&host, "main.js"), 0);
    assert_eq!(host.captured_output(), "function\n");
}

#[test]
fn test_unhandled_rejection_exits_one() {
    let fx = Fixture::new(&[(
        "main.js",
        "Promise.reject(new Error('late'));\nconsole.log('sync done');\n",
    )]);
    let host = fx.host();
    assert_eq!(fx.run(&host, "main.js"), 1);
    let output = host.captured_output();
    assert!(output.starts_with("sync done\n"));
    assert!(output.contains("Uncaught (in promise) Error: late"));
}

#[test]
fn test_async_throw_exits_one() {
    let fx = Fixture::new(&[(
        "main.js",
        "async function go() { await null; throw new TypeError('async'); }\ngo();\n",
    )]);
    let host = fx.host();
    assert_eq!(fx.run(&host, "main.js"), 1);
    assert!(host.captured_output().contains("TypeError: async"));
}

#[test]
fn test_handled_rejection_keeps_exit_code() {
    let fx = Fixture::new(&[(
        "main.js",
        "var p = Promise.reject(new Error('x'));\np.catch(function (e) { console.log('handled', e.message); });\nprocess.exitCode = 2;\n",
    )]);
    let host = fx.host();
    assert_eq!(fx.run(&host, "main.js"), 2);
    assert_eq!(host.captured_output(), "handled x\n");
}

#[test]
fn test_rust_exit_handlers_get_code() {
    let fx = Fixture::new(&[("main.js", "process.exit(7);\n")]);
    let host = fx.host();
    let seen = Rc::new(Cell::new(None));
    let sink = Rc::clone(&seen);
    host.on_exit(Box::new(move |code| sink.set(Some(code))));
    fx.run(&host, "main.js");
    assert_eq!(seen.get(), Some(7));
}

#[test]
fn test_module_interceptor_replaces_text() {
    let fx = Fixture::new(&[
        ("main.js", "console.log(require('./b').word);\n"),
        ("b.js", "exports.word = 'ORIGINAL';\n"),
    ]);
    let host = fx.host();
    let reg = HookRegistration::new(all_paths(), replacing("ORIGINAL", "PATCHED"), HookOptions::new());
    let guard = reg.install(&host);
    fx.run(&host, "main.js");
    drop(guard);
    assert_eq!(host.captured_output(), "PATCHED\n");
}

#[test]
fn test_run_in_context_slot_needs_option() {
    let source = r#"console.log(require('vm').runInThisContext('"ORIGINAL"', '/virtual.js'));"#;
    let fx = Fixture::new(&[("main.js", source)]);
    let virtual_only = || -> MatchFn { Rc::new(|p: &Path| p == Path::new("/virtual.js")) };

    let host = fx.host();
    let plain = HookRegistration::new(
        virtual_only(),
        replacing("ORIGINAL", "PATCHED"),
        HookOptions::new(),
    );
    let _guard = plain.install(&host);
    fx.run(&host, "main.js");
    assert_eq!(host.captured_output(), "ORIGINAL\n");

    let host = fx.host();
    let with_context = HookRegistration::new(
        virtual_only(),
        replacing("ORIGINAL", "PATCHED"),
        HookOptions::new().with_run_in_context(true),
    );
    let _guard = with_context.install(&host);
    fx.run(&host, "main.js");
    assert_eq!(host.captured_output(), "PATCHED\n");
}

#[test]
fn test_cache_listing_and_eviction() {
    let fx = Fixture::new(&[("main.js", "require('./b');\n"), ("b.js", "\n")]);
    let host = fx.host();
    fx.run(&host, "main.js");

    let cached = host.cached_modules();
    assert!(cached.contains(&fx.path("b.js")));
    assert!(host.evict_module(&fx.path("b.js")));
    assert!(!host.evict_module(&fx.path("b.js")));
    assert!(!host.cached_modules().contains(&fx.path("b.js")));
}

#[test]
fn test_eviction_drops_counter_arrays() {
    let fx = Fixture::new(&[("main.js", "require('./b');\n"), ("b.js", "\n")]);
    let host = fx.host();
    let trace = TraceContext::new();
    host.bind_trace(&trace);
    fx.run(&host, "main.js");

    let b = fx.path("b.js");
    let name = trace.global_name().to_string();
    let seed = format!(
        "globalThis[{name:?}] = {{ {b:?}: [4], other: [1] }};",
        b = b.to_string_lossy()
    );
    host.evaluate(&seed).unwrap();
    assert!(host.evict_module(&b));
    let left = host.evaluate(&format!("Object.keys(globalThis[{name:?}])")).unwrap();
    assert_eq!(left, serde_json::json!(["other"]));
}

#[test]
fn test_post_require_hook_sees_transformed_text() {
    let fx = Fixture::new(&[
        ("main.js", "console.log('before');\n"),
        (
            "hook.js",
            "module.exports = function (match, transform, verbose) {\n  return function (code, filename) { return match(filename) ? code.replace('before', 'after') : code; };\n};\n",
        ),
    ]);
    let host = fx.host();
    host.install_post_require_hook(&fx.path("hook.js"), false).unwrap();
    let only_main: MatchFn = {
        let main = fx.path("main.js");
        Rc::new(move |p: &Path| p == main)
    };
    let reg = HookRegistration::new(only_main, replacing("x", "x"), HookOptions::new());
    let _guard = reg.install(&host);
    fx.run(&host, "main.js");
    assert_eq!(host.captured_output(), "after\n");
}

#[test]
fn test_post_require_hook_must_export_function() {
    let fx = Fixture::new(&[("hook.js", "module.exports = 42;\n")]);
    let host = fx.host();
    let err = host
        .install_post_require_hook(&fx.path("hook.js"), false)
        .unwrap_err();
    assert!(matches!(err, TraceError::Script { .. }));
}

#[test]
fn test_evaluate_returns_json() {
    let host = ScriptHost::with_cwd("/").unwrap();
    assert_eq!(host.evaluate("[1, 2].concat([3])").unwrap(), serde_json::json!([1, 2, 3]));
    assert!(host.evaluate("throw new TypeError('x')").is_err());
}

#[test]
fn test_counts_from_json_accepts_floats() {
    let json = serde_json::json!({ "/a.js": [1, 2.0, 0], "/bad": "x" });
    let counts = counts_from_json(&json);
    assert_eq!(counts["/a.js"], vec![1, 2, 0]);
    assert!(!counts.contains_key("/bad"));
}
