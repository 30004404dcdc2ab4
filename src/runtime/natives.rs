use crate::runtime::{
    error::RuntimeError,
    value::{NativeFn, NativeFunction, Value},
};
use std::io::Write;

pub const BUILTIN_API: &str = "FortressBuiltin";

struct NativeSpec {
    name: &'static str,
    arity: usize,
    func: NativeFn,
}

const BUILTINS: &[NativeSpec] = &[
    NativeSpec {
        name: "println",
        arity: 1,
        func: native_println,
    },
    NativeSpec {
        name: "print",
        arity: 1,
        func: native_print,
    },
    NativeSpec {
        name: "assert",
        arity: 1,
        func: native_assert,
    },
    NativeSpec {
        name: "assertEq",
        arity: 2,
        func: native_assert_eq,
    },
    NativeSpec {
        name: "fail",
        arity: 1,
        func: native_fail,
    },
    NativeSpec {
        name: "str",
        arity: 1,
        func: native_str,
    },
    NativeSpec {
        name: "len",
        arity: 1,
        func: native_len,
    },
    NativeSpec {
        name: "threadCount",
        arity: 0,
        func: native_thread_count,
    },
];

/// Finds the Rust implementation behind a declaration of a native API.
pub fn lookup(api: &str, name: &str) -> Option<NativeFunction> {
    let table = match api {
        BUILTIN_API => BUILTINS,
        _ => return None,
    };
    table
        .iter()
        .find(|spec| spec.name == name)
        .map(|spec| NativeFunction {
            name: spec.name.to_string(),
            arity: Some(spec.arity),
            func: spec.func,
        })
}

fn native_println(args: &[Value]) -> Result<Value, RuntimeError> {
    println!("{}", args[0]);
    Ok(Value::Unit)
}

fn native_print(args: &[Value]) -> Result<Value, RuntimeError> {
    print!("{}", args[0]);
    std::io::stdout().flush().ok();
    Ok(Value::Unit)
}

fn native_assert(args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Bool(true) => Ok(Value::Unit),
        Value::Bool(false) => Err(RuntimeError::AssertionFailed {
            message: "condition was false".into(),
        }),
        other => Err(RuntimeError::TypeMismatch {
            expected: "bool".into(),
            found: other.type_name(),
        }),
    }
}

fn native_assert_eq(args: &[Value]) -> Result<Value, RuntimeError> {
    if args[0].equals(&args[1]) {
        Ok(Value::Unit)
    } else {
        Err(RuntimeError::AssertionFailed {
            message: format!("expected {:?}, found {:?}", args[1], args[0]),
        })
    }
}

fn native_fail(args: &[Value]) -> Result<Value, RuntimeError> {
    Err(RuntimeError::Thrown {
        message: args[0].to_string(),
    })
}

fn native_str(args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Str(args[0].to_string()))
}

fn native_len(args: &[Value]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Str(text) => Ok(Value::Int(text.chars().count() as i64)),
        Value::Tuple(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(RuntimeError::TypeMismatch {
            expected: "string or tuple".into(),
            found: other.type_name(),
        }),
    }
}

fn native_thread_count(_args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Int(rayon::current_num_threads() as i64))
}
