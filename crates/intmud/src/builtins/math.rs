//! Math builtins. Trigonometry works in radians; results are doubles
//! except where the input type is preserved (`intabs`, `intmax`,
//! `intmin`, `intsinal`, `intaleat`).

use rand::Rng;

use super::Builtin;
use crate::value::Value;

pub(super) fn call(builtin: Builtin, args: &[Value]) -> Value {
    let a = args.first();
    let x = a.map_or(0.0, Value::to_f64);
    let y = args.get(1).map_or(0.0, Value::to_f64);
    match builtin {
        Builtin::IntAbs => match a {
            Some(Value::Int(v)) => Value::Int(v.wrapping_abs()),
            _ => Value::Double(x.abs()),
        },
        Builtin::IntSen => Value::Double(x.sin()),
        Builtin::IntCos => Value::Double(x.cos()),
        Builtin::IntTan => Value::Double(x.tan()),
        Builtin::IntASen => Value::Double(x.asin()),
        Builtin::IntACos => Value::Double(x.acos()),
        Builtin::IntATan => Value::Double(x.atan()),
        Builtin::IntATan2 => Value::Double(x.atan2(y)),
        Builtin::IntSenH => Value::Double(x.sinh()),
        Builtin::IntCosH => Value::Double(x.cosh()),
        Builtin::IntTanH => Value::Double(x.tanh()),
        Builtin::IntLog => Value::Double(x.ln()),
        Builtin::IntLog10 => Value::Double(x.log10()),
        Builtin::IntExp => Value::Double(x.exp()),
        Builtin::IntRaiz => Value::Double(x.sqrt()),
        Builtin::IntPot => Value::Double(x.powf(y)),
        Builtin::IntCima => Value::Double(x.ceil()),
        Builtin::IntBaixo => Value::Double(x.floor()),
        Builtin::IntArred => Value::Double(x.round()),
        Builtin::IntTrunc => Value::Double(x.trunc()),
        Builtin::IntGrau => Value::Double(x.to_degrees()),
        Builtin::IntRad => Value::Double(x.to_radians()),
        Builtin::IntMax | Builtin::IntMin => {
            let mut best: Option<Value> = None;
            for arg in args {
                let better = match &best {
                    None => true,
                    Some(current) => {
                        let cmp = arg.compare(current);
                        if builtin == Builtin::IntMax {
                            cmp.is_gt()
                        } else {
                            cmp.is_lt()
                        }
                    }
                };
                if better {
                    best = Some(arg.clone());
                }
            }
            best.unwrap_or(Value::Null)
        }
        Builtin::IntSinal => {
            let v = x;
            Value::Int(if v > 0.0 {
                1
            } else if v < 0.0 {
                -1
            } else {
                0
            })
        }
        Builtin::IntAleat => {
            let n = a.map_or(0, Value::to_i64);
            if n <= 0 {
                Value::Int(0)
            } else {
                Value::Int(rand::thread_rng().gen_range(0..n))
            }
        }
        other => unreachable!("not a math builtin: {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(value: &Value, expect: f64) -> bool {
        (value.to_f64() - expect).abs() < 1e-9
    }

    #[test]
    fn trig_in_radians() {
        assert!(close(&call(Builtin::IntSen, &[Value::Double(0.0)]), 0.0));
        assert!(close(
            &call(Builtin::IntCos, &[Value::Double(std::f64::consts::PI)]),
            -1.0
        ));
    }

    #[test]
    fn abs_preserves_ints() {
        assert!(matches!(call(Builtin::IntAbs, &[Value::Int(-3)]), Value::Int(3)));
        assert!(close(&call(Builtin::IntAbs, &[Value::Double(-2.5)]), 2.5));
    }

    #[test]
    fn degree_radian_round_trip() {
        let rad = call(Builtin::IntRad, &[Value::Double(180.0)]);
        assert!(close(&rad, std::f64::consts::PI));
        let deg = call(Builtin::IntGrau, &[rad]);
        assert!(close(&deg, 180.0));
    }

    #[test]
    fn aleat_stays_in_range() {
        for _ in 0..100 {
            let v = call(Builtin::IntAleat, &[Value::Int(5)]).to_i64();
            assert!((0..5).contains(&v));
        }
        assert_eq!(call(Builtin::IntAleat, &[Value::Int(0)]).to_i64(), 0);
    }

    #[test]
    fn max_and_min_over_varargs() {
        let args = [Value::Int(3), Value::Int(9), Value::Int(-2)];
        assert!(matches!(call(Builtin::IntMax, &args), Value::Int(9)));
        assert!(matches!(call(Builtin::IntMin, &args), Value::Int(-2)));
    }
}
