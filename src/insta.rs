//! This module is solely for end-to-end testing of the parser/compiler/vm,
//! with insta snapshots for routine listings.
#![cfg(test)]

use std::io::{self, Write};

use chumsky::prelude::Simple;
use pretty_assertions::assert_eq;

use crate::{
    config::EngineConfig,
    driver::{Driver, Outcome},
    error::{ExecError, Fault},
    opcode::Routine,
    side_effect::SideEffectHandler,
};

#[derive(Default)]
struct CaptureHandler {
    stdout: Vec<u8>,
    routines: Vec<u8>,
    errors: Vec<String>,
}

impl SideEffectHandler for CaptureHandler {
    fn compile_error(&mut self, _file_name: &str, _source: &str, errors: Vec<Simple<char>>) -> io::Result<()> {
        self.errors.extend(errors.iter().map(Simple::<char>::to_string));
        Ok(())
    }

    fn routine(&mut self, index: usize, routine: &Routine) -> io::Result<()> {
        routine.write(&format!("statement {}", index), &mut self.routines)
    }

    fn output(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stdout.write_all(bytes)
    }
}

fn drive(test_name: &str, source: &str, log_path: &str) -> (Outcome, CaptureHandler) {
    let mut handler = CaptureHandler::default();
    let mut driver = Driver {
        file_name: test_name.into(),
        source: source.into(),
        log_path: log_path.into(),
        config: EngineConfig::default(),
        run: true,
        handler: &mut handler,
    };
    let outcome = driver.run().unwrap();
    (outcome, handler)
}

fn output_of(source: &str) -> Vec<u8> {
    let (outcome, handler) = drive("inline source", source, "/nonexistent/osl.log");
    assert!(matches!(outcome, Outcome::Completed), "run failed: {:?}", outcome);
    handler.stdout
}

#[test]
fn test_print_int() {
    for value in [0u64, 7, 42, 1_000_000, 99_999_999, 123_456_789_012, u64::MAX] {
        let source = format!("x = {};\nprint x;\n", value);
        assert_eq!(output_of(&source), format!("{}\n", value).into_bytes());
    }
}

#[test]
fn test_print_string() {
    assert_eq!(output_of(r#"x = "foobar"; print x;"#), b"foobar\n");
    assert_eq!(output_of(r#"x = "a\x00b\x00"; print x;"#), b"a\0b\0\n");
    assert_eq!(output_of(r#"x = "exactly16bytes!!"; print x;"#), b"exactly16bytes!!\n");
    assert_eq!(
        output_of(r#"x = "a string longer than the inline area"; print x;"#),
        b"a string longer than the inline area\n"
    );
}

#[test]
fn test_arithmetic() {
    assert_eq!(output_of("x = 2 + 3; print x;"), b"5\n");
    assert_eq!(output_of("x = 10 - 4; print x;"), b"6\n");
    assert_eq!(output_of("x = 3 * 4; print x;"), b"12\n");
    assert_eq!(output_of("a = 6; b = a * a - 1; print b;"), b"35\n");
    assert_eq!(output_of("x = (1 + 2) * (3 + 4); print x;"), b"21\n");
}

#[test]
fn test_negation_prints_unsigned() {
    assert_eq!(output_of("x = -5; print x;"), b"18446744073709551611\n");
    assert_eq!(output_of("x = 3 - 5; print x;"), b"18446744073709551614\n");
    assert_eq!(output_of("x = -5 + 8; print x;"), b"3\n");
}

#[test]
fn test_print_log_is_binary_safe() {
    let mut log = tempfile::NamedTempFile::new().unwrap();
    let content: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    log.write_all(&content).unwrap();
    log.flush().unwrap();

    let path = log.path().to_string_lossy().into_owned();
    let (outcome, handler) = drive("print_log", "print_log;", &path);
    assert!(matches!(outcome, Outcome::Completed));
    assert_eq!(handler.stdout.len(), content.len());
    assert_eq!(handler.stdout, content);
}

#[test]
fn test_print_log_with_missing_file_prints_nothing() {
    assert_eq!(output_of("x = 1; print_log; print x;"), b"1\n");
}

#[test]
fn test_print_log_with_unreadable_file_prints_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_string_lossy().into_owned();
    let (outcome, handler) = drive("log dir", "x = 1; print x; print_log; print x;", &path);
    assert!(matches!(outcome, Outcome::Completed), "run failed: {:?}", outcome);
    assert_eq!(handler.stdout, b"1\n1\n");
}

#[test]
fn test_string_reassignment_reuses_buffer() {
    // The shorter string is copied over the old one and the old length stays.
    assert_eq!(output_of(r#"x = "hello"; x = "abc"; print x;"#), b"abclo\n");
}

#[test]
fn test_equal_length_string_reuses_buffer() {
    // Both literals are 20 bytes. The second is copied into the first
    // literal's storage, so the cell keeps pointing at 0x6000_2710.
    assert_eq!(
        output_of(
            r#"x = "AAAAAAAAAAAAAAAAAAAA"; x = "BBBBBBBBBBBBBBBBBBBB"; print x; del x; print x;"#
        ),
        b"BBBBBBBBBBBBBBBBBBBB\n1610622736\n"
    );
}

#[test]
fn test_longer_string_replaces_header() {
    assert_eq!(output_of(r#"x = "abc"; x = "hello"; print x;"#), b"hello\n");
}

#[test]
fn test_integer_after_string_overwrites_tag() {
    assert_eq!(output_of(r#"x = "abc"; x = 9; print x;"#), b"9\n");
}

#[test]
fn test_deleted_string_reads_back_as_its_address() {
    // 0x6000_0020 is the inline buffer of the first data cell.
    assert_eq!(output_of(r#"s = "abc"; del s; print s;"#), b"1610612768\n");
}

#[test]
fn test_arithmetic_on_string_shifts_pointer() {
    assert_eq!(
        output_of(r#"s = 2 + "abcdefghijklmnopqrstuvwxyz"; print s;"#),
        b"cdefghijklmnopqrstuvwxyz\0\0\n"
    );
}

#[test]
fn test_wide_integer_print_turns_cell_into_string() {
    let (outcome, handler) = drive("wide", "x = 123456789012; print x; print x;", "unused.log");
    assert_eq!(handler.stdout, b"123456789012\n");
    match outcome {
        Outcome::RunFailed(failure) => assert!(matches!(
            failure.error,
            ExecError::Fault {
                index: 2,
                source: Fault::Memory { address: 123_456_789_012, .. }
            }
        )),
        other => panic!("expected a fault, got {:?}", other),
    }
}

#[test]
fn test_parse_error_is_reported() {
    let (outcome, handler) = drive("bad", "x = ;", "unused.log");
    assert!(matches!(outcome, Outcome::ParseFailed));
    assert!(!handler.errors.is_empty());
    assert!(handler.stdout.is_empty());
}

#[test]
fn test_routine_listing() {
    let (outcome, handler) = drive("listing", "x = 2 + 3; print x;", "unused.log");
    assert!(matches!(outcome, Outcome::Completed));
    assert_eq!(handler.stdout, b"5\n");

    insta::assert_snapshot!(String::from_utf8_lossy(&handler.routines).trim_end(), @r###"
    ==== statement 0 ====
    0000 | OP_ENTER
    0001 | OP_PUSH      | 0x0
    0010 | OP_PUSH      | 0x3
    0019 | OP_PUSH      | 0x0
    0028 | OP_PUSH      | 0x2
    0037 | OP_ADD
    0038 | OP_STORE     | 0x60000010
    0047 | OP_LEAVE
    0048 | OP_RETURN
    ==== statement 1 ====
    0000 | OP_ENTER
    0001 | OP_PRINT     | 0x60000010
    0010 | OP_LEAVE
    0011 | OP_RETURN
    "###);
}

#[test]
fn test_delete_listing() {
    let (_, handler) = drive("delete", "x = 1; del x;", "unused.log");
    let listing = String::from_utf8_lossy(&handler.routines);
    let delete = listing.split("==== statement 1 ====").nth(1).unwrap();
    insta::assert_snapshot!(delete.trim(), @r###"
    0000 | OP_ENTER
    0001 | OP_RELEASE   | 0x60000010
    0010 | OP_LEAVE
    0011 | OP_RETURN
    "###);
}
