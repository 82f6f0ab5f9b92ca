//! End-to-end scenarios, run against the built `wispc` binary in file mode. Exercises both
//! interpreters through `--engine`, the same way a user would pick one from the CLI.

use std::io::Write;

use assert_cmd::Command;
use tempfile::TempDir;

fn run(engine: &str, source: &str) -> (String, String, i32) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("script.wisp");
    std::fs::File::create(&path).unwrap().write_all(source.as_bytes()).unwrap();

    let output = Command::cargo_bin("wispc").unwrap().arg("--engine").arg(engine).arg(&path).output().unwrap();

    (
        String::from_utf8(output.stdout).unwrap(),
        String::from_utf8(output.stderr).unwrap(),
        output.status.code().unwrap_or(-1),
    )
}

fn lines(s: &str) -> Vec<&str> {
    s.lines().collect()
}

#[test]
fn arithmetic_precedence_bytecode() {
    let (stdout, _, code) = run("bytecode", "print 1 + 2 * 3;");
    assert_eq!(lines(&stdout), vec!["7"]);
    assert_eq!(code, 0);
}

#[test]
fn arithmetic_precedence_treewalk() {
    let (stdout, _, code) = run("treewalk", "print 1 + 2 * 3;");
    assert_eq!(lines(&stdout), vec!["7"]);
    assert_eq!(code, 0);
}

#[test]
fn string_concat_and_equality() {
    let source = r#"var a = "foo"; var b = "bar"; print a + b; print a + b == "foobar";"#;
    for engine in ["bytecode", "treewalk"] {
        let (stdout, _, code) = run(engine, source);
        assert_eq!(lines(&stdout), vec!["foobar", "true"], "engine={engine}");
        assert_eq!(code, 0, "engine={engine}");
    }
}

#[test]
fn closure_capture_and_mutation() {
    let source = r#"
        fun mk() { var x = 0; fun inc() { x = x + 1; return x; } return inc; }
        var c = mk(); print c(); print c(); print c();
    "#;
    for engine in ["bytecode", "treewalk"] {
        let (stdout, _, code) = run(engine, source);
        assert_eq!(lines(&stdout), vec!["1", "2", "3"], "engine={engine}");
        assert_eq!(code, 0, "engine={engine}");
    }
}

#[test]
fn fibonacci_recursion() {
    let source = r#"
        fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
        print fib(10);
    "#;
    for engine in ["bytecode", "treewalk"] {
        let (stdout, _, code) = run(engine, source);
        assert_eq!(lines(&stdout), vec!["55"], "engine={engine}");
        assert_eq!(code, 0, "engine={engine}");
    }
}

#[test]
fn inheritance_and_super() {
    let source = r#"
        class A { greet() { print "A"; } }
        class B < A { greet() { super.greet(); print "B"; } }
        B().greet();
    "#;
    for engine in ["bytecode", "treewalk"] {
        let (stdout, _, code) = run(engine, source);
        assert_eq!(lines(&stdout), vec!["A", "B"], "engine={engine}");
        assert_eq!(code, 0, "engine={engine}");
    }
}

#[test]
fn initializer_and_field_access() {
    let source = r#"
        class P { init(x) { this.x = x; } }
        print P(42).x;
    "#;
    for engine in ["bytecode", "treewalk"] {
        let (stdout, _, code) = run(engine, source);
        assert_eq!(lines(&stdout), vec!["42"], "engine={engine}");
        assert_eq!(code, 0, "engine={engine}");
    }
}

#[test]
fn runtime_error_reports_traceback_and_exits_70() {
    let source = "var a; a + 1;";
    for engine in ["bytecode", "treewalk"] {
        let (_, stderr, code) = run(engine, source);
        assert!(stderr.contains("Operands must be"), "engine={engine} stderr={stderr}");
        assert!(stderr.contains("[line 1]"), "engine={engine} stderr={stderr}");
        assert_eq!(code, 70, "engine={engine}");
    }
}

#[test]
fn repl_recovers_after_a_runtime_error_on_an_earlier_line() {
    // One Vm/Interpreter lives across the whole REPL session, so a runtime error on one
    // line must not leave stale state that corrupts the next line.
    let stdin = "var a;\na + 1;\nvar x = 1;\nfun f(n) { return n + 1; }\nprint f(x);\n";
    for engine in ["bytecode", "treewalk"] {
        let assert = Command::cargo_bin("wispc")
            .unwrap()
            .arg("--engine")
            .arg(engine)
            .write_stdin(stdin)
            .assert();
        let output = assert.get_output();
        let stdout = String::from_utf8(output.stdout.clone()).unwrap();
        assert!(stdout.contains('2'), "engine={engine} stdout={stdout}");
        assert_eq!(output.status.code(), Some(0), "engine={engine}");
    }
}

#[test]
fn too_many_args_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    let one = dir.path().join("one.wisp");
    let two = dir.path().join("two.wisp");
    std::fs::write(&one, "print 1;").unwrap();
    std::fs::write(&two, "print 2;").unwrap();

    let output = Command::cargo_bin("wispc").unwrap().arg(&one).arg(&two).output().unwrap();
    assert_eq!(output.status.code(), Some(64));
}
