//! Extended tests for the hdrbind parser
//!
//! These tests run the preprocessor and the declaration parser together on
//! small header trees shaped like the Windows SDK.

use super::*;
use hdrbind_core::{DeclKind, DiagnosticKind, Namespace, Primitive, TypeRef};
use std::fs;
use tempfile::TempDir;

fn write_sdk(dir: &Path) {
    fs::write(
        dir.join("minwindef.h"),
        r#"
#ifndef _MINWINDEF_
#define _MINWINDEF_

#define MAX_PATH 260
#define FALSE 0
#define TRUE 1
#define WINAPI __stdcall
#define CONST const

typedef unsigned long DWORD;
typedef int BOOL;
typedef unsigned char BYTE;
typedef void *HANDLE;
typedef CONST char *LPCSTR;
typedef DWORD *LPDWORD;

#endif
"#,
    )
    .unwrap();

    fs::write(
        dir.join("fileapi.h"),
        r#"
#include <minwindef.h>

typedef struct _WIN32_FIND_DATAA {
    DWORD dwFileAttributes;
    char cFileName[MAX_PATH];
} WIN32_FIND_DATAA, *LPWIN32_FIND_DATAA;

#ifdef _WIN64
#define FILEAPI_PTR_BITS 64
#else
#define FILEAPI_PTR_BITS 32
#endif

HANDLE WINAPI FindFirstFileA(
    _In_ LPCSTR lpFileName,
    _Out_ LPWIN32_FIND_DATAA lpFindFileData
    );

BOOL WINAPI CloseHandle(_In_ HANDLE hObject);
"#,
    )
    .unwrap();
}

fn parse(dir: &Path, entry: &str, arch: &str) -> TranslationUnit {
    let resolver = HeaderResolver::new(vec![dir.to_path_buf()]).unwrap();
    let profile = arch.parse::<hdrbind_core::Architecture>().unwrap().profile();
    parse_translation_unit(
        &dir.join(entry),
        resolver,
        &profile,
        &ParserConfig::default(),
        true,
    )
    .unwrap()
}

fn header<'a>(unit: &'a TranslationUnit, name: &str) -> &'a ParsedHeader {
    unit.headers
        .iter()
        .find(|h| h.path.file_name().unwrap() == name)
        .unwrap()
}

fn decl<'a>(header: &'a ParsedHeader, name: &str) -> &'a Declaration {
    header
        .declarations
        .iter()
        .find(|d| d.name == name)
        .unwrap_or_else(|| panic!("{} missing", name))
}

/// Declarations land in the header that defines them
#[test]
fn test_declarations_attributed_to_defining_header() {
    let temp = TempDir::new().unwrap();
    write_sdk(temp.path());
    let unit = parse(temp.path(), "fileapi.h", "x86-64");

    assert_eq!(unit.headers.len(), 2);
    assert!(unit.headers[0].path.ends_with("minwindef.h"));

    let minwindef = header(&unit, "minwindef.h");
    assert_eq!(
        decl(minwindef, "DWORD").kind,
        DeclKind::Typedef(TypeRef::Primitive(Primitive::ULong))
    );
    assert_eq!(decl(minwindef, "MAX_PATH").kind.label(), "constant");
    assert!(minwindef.declarations.iter().all(|d| d.name != "FindFirstFileA"));

    let fileapi = header(&unit, "fileapi.h");
    assert_eq!(fileapi.includes.len(), 1);
    assert!(fileapi.declarations.iter().all(|d| d.name != "DWORD"));
    assert_eq!(decl(fileapi, "FindFirstFileA").kind.label(), "function");
}

/// Macros from an included header expand in the includer
#[test]
fn test_macros_cross_headers() {
    let temp = TempDir::new().unwrap();
    write_sdk(temp.path());
    let unit = parse(temp.path(), "fileapi.h", "x86-64");
    let fileapi = header(&unit, "fileapi.h");

    match &decl(fileapi, "_WIN32_FIND_DATAA").kind {
        DeclKind::Struct(def) => {
            let fields = def.fields.as_ref().unwrap();
            assert_eq!(
                fields[1].ty,
                TypeRef::Array {
                    element: Box::new(TypeRef::Primitive(Primitive::Char)),
                    len: Some(260)
                }
            );
        }
        other => panic!("unexpected {:?}", other),
    }

    match &decl(fileapi, "CloseHandle").kind {
        DeclKind::Function(sig) => {
            assert_eq!(sig.call_conv, hdrbind_core::CallConv::Stdcall);
            assert_eq!(sig.ret, TypeRef::named("BOOL", Namespace::Ordinary));
        }
        other => panic!("unexpected {:?}", other),
    }
}

/// The architecture profile selects conditional branches
#[test]
fn test_profile_selects_branch() {
    let temp = TempDir::new().unwrap();
    write_sdk(temp.path());

    for (arch, bits) in [("x86-64", "64"), ("x86", "32")] {
        let unit = parse(temp.path(), "fileapi.h", arch);
        let fileapi = header(&unit, "fileapi.h");
        match &decl(fileapi, "FILEAPI_PTR_BITS").kind {
            DeclKind::Constant(tokens) => assert_eq!(tokens[0].spelling(), bits),
            other => panic!("unexpected {:?}", other),
        }
    }
}

/// Parsing the same tree twice gives identical output
#[test]
fn test_deterministic_output() {
    let temp = TempDir::new().unwrap();
    write_sdk(temp.path());

    let first = parse(temp.path(), "fileapi.h", "x86-64");
    let second = parse(temp.path(), "fileapi.h", "x86-64");
    for (a, b) in first.headers.iter().zip(&second.headers) {
        assert_eq!(a.declarations, b.declarations);
    }
    assert_eq!(first.diagnostics, second.diagnostics);
}

/// A malformed declaration does not stop the rest of the header
#[test]
fn test_malformed_declaration_is_isolated() {
    let temp = TempDir::new().unwrap();
    fs::write(
        temp.path().join("entry.h"),
        "int before;\nUNDEFINED_MACRO(x, y) z;\nint after;\n",
    )
    .unwrap();

    let unit = parse(temp.path(), "entry.h", "x86-64");
    let entry = header(&unit, "entry.h");
    assert_eq!(unit.diagnostics.count(DiagnosticKind::MalformedDeclaration), 1);
    assert_eq!(entry.declarations.len(), 2);
}
