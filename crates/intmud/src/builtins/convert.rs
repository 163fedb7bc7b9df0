//! Type-conversion builtins and the literal predicates.

use super::Builtin;
use crate::value::Value;

pub(super) fn call(builtin: Builtin, args: &[Value]) -> Value {
    let arg = args.first();
    match builtin {
        Builtin::Real => Value::Double(arg.map_or(0.0, Value::to_f64)),
        Builtin::Hex => Value::from(format!("{:X}", arg.map_or(0, Value::to_i64))),
        Builtin::Bin => Value::from(format!("{:b}", arg.map_or(0, Value::to_i64))),
        Builtin::Chr => {
            let code = arg.map_or(-1, Value::to_i64);
            u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .map_or_else(|| Value::from(""), |c| Value::from(c.to_string()))
        }
        Builtin::Asc => {
            let text = arg.map(Value::to_text).unwrap_or_default();
            Value::Int(text.chars().next().map_or(0, |c| i64::from(c as u32)))
        }
        Builtin::Verdade => Value::Int(1),
        Builtin::Falso => Value::Int(0),
        other => unreachable!("not a conversion builtin: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_bin_are_uppercase_strings() {
        assert_eq!(&*call(Builtin::Hex, &[Value::Int(255)]).to_text(), "FF");
        assert_eq!(&*call(Builtin::Bin, &[Value::Int(5)]).to_text(), "101");
    }

    #[test]
    fn chr_and_asc() {
        assert_eq!(&*call(Builtin::Chr, &[Value::Int(65)]).to_text(), "A");
        assert_eq!(&*call(Builtin::Chr, &[Value::Int(-1)]).to_text(), "");
        assert_eq!(&*call(Builtin::Chr, &[Value::Int(0x0011_0000)]).to_text(), "");
        assert_eq!(call(Builtin::Asc, &[Value::from("Abc")]).to_i64(), 65);
        assert_eq!(call(Builtin::Asc, &[Value::from("")]).to_i64(), 0);
    }

    #[test]
    fn literal_predicates() {
        assert_eq!(call(Builtin::Verdade, &[]).to_i64(), 1);
        assert_eq!(call(Builtin::Falso, &[]).to_i64(), 0);
    }
}
