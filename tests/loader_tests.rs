//! Wire-format tests against hand-assembled byte sequences, plus file
//! loading through the public API.

use frogvm::bytecode::{self, LoadError, BUILTIN_ENTRY_IP};
use frogvm::{Constant, FunctionInfo, Instruction, Module, OpCode, TypeTag};

/// Hand-assembled image of a two-constant, one-function, two-instruction
/// module. Everything big-endian.
fn golden_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend(b"FROG");
    bytes.extend([0x00, 0x01]); // version 1
    bytes.extend([0, 0, 0, 2]); // const_count
    bytes.extend([0, 0, 0, 1]); // func_count
    bytes.extend([0, 0, 0, 2]); // code_size

    // const 0: string "go"
    bytes.push(4);
    bytes.extend([0, 0, 0, 2]);
    bytes.extend(b"go");
    // const 1: int -2
    bytes.push(1);
    bytes.extend([0xFF, 0xFF, 0xFF, 0xFE]);

    // function: name 0, params 1, locals 2, entry 1, returns int, param int
    bytes.extend([0, 0, 0, 0]);
    bytes.extend([0, 1]);
    bytes.extend([0, 2]);
    bytes.extend([0, 0, 0, 1]);
    bytes.push(1);
    bytes.push(1);

    // code 0: PUSH_CONST a=1
    bytes.extend([0, 0b01]);
    bytes.extend([0, 0, 0, 1]);
    // code 1: RET, no operands
    bytes.extend([24, 0b00]);

    bytes
}

fn golden_module() -> Module {
    Module {
        const_pool: vec![Constant::Str("go".to_string()), Constant::Int(-2)],
        functions: vec![FunctionInfo {
            name_const: 0,
            param_count: 1,
            local_count: 2,
            entry_ip: 1,
            return_type: TypeTag::Int,
            param_types: vec![TypeTag::Int],
        }],
        code: vec![
            Instruction::with_a(OpCode::PushConst, 1),
            Instruction::op(OpCode::Ret),
        ],
    }
}

#[test]
fn test_decode_golden_bytes() {
    let module = bytecode::deserialize(&golden_bytes()).unwrap();
    assert_eq!(module, golden_module());
}

#[test]
fn test_encode_matches_golden_bytes() {
    assert_eq!(bytecode::serialize(&golden_module()), golden_bytes());
}

#[test]
fn test_float_and_bool_constants() {
    let module = Module {
        const_pool: vec![
            Constant::Float(-0.5),
            Constant::Bool(true),
            Constant::Bool(false),
        ],
        ..Default::default()
    };
    let decoded = bytecode::deserialize(&bytecode::serialize(&module)).unwrap();
    assert_eq!(decoded, module);
}

#[test]
fn test_builtin_entry_round_trips() {
    let module = Module {
        const_pool: vec![Constant::Str("print".to_string())],
        functions: vec![FunctionInfo {
            name_const: 0,
            param_count: 1,
            local_count: 0,
            entry_ip: BUILTIN_ENTRY_IP,
            return_type: TypeTag::Void,
            param_types: vec![TypeTag::Str],
        }],
        code: vec![],
    };
    let decoded = bytecode::deserialize(&bytecode::serialize(&module)).unwrap();
    assert!(decoded.functions[0].is_builtin());
    assert_eq!(decoded, module);
}

#[test]
fn test_operand_flags_drive_presence() {
    let module = Module {
        const_pool: vec![Constant::Int(0)],
        functions: vec![],
        code: vec![
            Instruction::op(OpCode::Add),
            Instruction::with_b(OpCode::NewArray, 0),
            Instruction::with_ab(OpCode::StoreLocal, 5, 6),
        ],
    };
    let decoded = bytecode::deserialize(&bytecode::serialize(&module)).unwrap();
    assert_eq!(decoded.code[0].a, None);
    assert_eq!(decoded.code[0].b, None);
    assert_eq!(decoded.code[1].b, Some(0));
    assert_eq!(decoded.code[2], Instruction::with_ab(OpCode::StoreLocal, 5, 6));
}

#[test]
fn test_load_file() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("frogvm_loader_{:?}.frogc", std::thread::current().id()));
    std::fs::write(&path, bytecode::serialize(&golden_module())).unwrap();

    let module = bytecode::load_file(&path).unwrap();
    assert_eq!(module, golden_module());

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_load_file_missing() {
    let err = bytecode::load_file(std::path::Path::new("/nonexistent/file.frogc")).unwrap_err();
    assert!(matches!(err, LoadError::Io(_)));
}

#[test]
fn test_load_error_messages() {
    assert_eq!(LoadError::BadMagic.to_string(), "bad magic");
    assert_eq!(
        LoadError::UnsupportedVersion(3).to_string(),
        "unsupported version: 3"
    );
    assert_eq!(LoadError::UnexpectedEof.to_string(), "unexpected end of file");
    assert_eq!(LoadError::InvalidOpcode(99).to_string(), "invalid opcode: 99");
}
