//! OSC argument coercion
//!
//! Typed binds coerce the first argument of a message to the bound base
//! kind. A missing argument becomes the kind's zero value; int and float
//! cross-convert freely; strings are parsed for numeric binds and numbers are
//! formatted for string binds; numerics are truthy above zero. A conversion
//! outside this matrix is an explicit `UnsupportedMessage` error, never a
//! silent reinterpretation of the payload.

use crate::error::{Error, Result};
use rosc::{OscMessage, OscType};

/// First argument as an integer; missing argument is `0`
pub fn int_arg(message: &OscMessage) -> Result<i64> {
    match message.args.first() {
        None => Ok(0),
        Some(OscType::Int(i)) => Ok(i64::from(*i)),
        Some(OscType::Long(l)) => Ok(*l),
        Some(OscType::Float(f)) => Ok(*f as i64),
        Some(OscType::Double(d)) => Ok(*d as i64),
        Some(OscType::String(s)) => s
            .parse::<i64>()
            .map_err(|_| unsupported(message, "int")),
        Some(_) => Err(unsupported(message, "int")),
    }
}

/// First argument as a float; missing argument is `0.0`
pub fn float_arg(message: &OscMessage) -> Result<f64> {
    match message.args.first() {
        None => Ok(0.0),
        Some(OscType::Int(i)) => Ok(f64::from(*i)),
        Some(OscType::Long(l)) => Ok(*l as f64),
        Some(OscType::Float(f)) => Ok(f64::from(*f)),
        Some(OscType::Double(d)) => Ok(*d),
        Some(OscType::String(s)) => s
            .parse::<f64>()
            .map_err(|_| unsupported(message, "float")),
        Some(_) => Err(unsupported(message, "float")),
    }
}

/// First argument as a string; missing argument is `""`
pub fn str_arg(message: &OscMessage) -> Result<String> {
    match message.args.first() {
        None => Ok(String::new()),
        Some(OscType::String(s)) => Ok(s.clone()),
        Some(OscType::Int(i)) => Ok(i.to_string()),
        Some(OscType::Long(l)) => Ok(l.to_string()),
        Some(OscType::Float(f)) => Ok(f.to_string()),
        Some(OscType::Double(d)) => Ok(d.to_string()),
        Some(_) => Err(unsupported(message, "str")),
    }
}

/// First argument as a boolean; missing argument is `false`.
///
/// Numerics are true above zero; of the strings, exactly `"true"` is true.
pub fn bool_arg(message: &OscMessage) -> Result<bool> {
    match message.args.first() {
        None => Ok(false),
        Some(OscType::Bool(b)) => Ok(*b),
        Some(OscType::Int(i)) => Ok(*i > 0),
        Some(OscType::Long(l)) => Ok(*l > 0),
        Some(OscType::Float(f)) => Ok(*f > 0.0),
        Some(OscType::Double(d)) => Ok(*d > 0.0),
        Some(OscType::String(s)) => Ok(s == "true"),
        Some(_) => Err(unsupported(message, "bool")),
    }
}

fn unsupported(message: &OscMessage, wanted: &str) -> Error {
    Error::UnsupportedMessage(format!(
        "{}: cannot read {:?} as {wanted}",
        message.addr,
        message.args.first()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: "/test".to_string(),
            args,
        }
    }

    #[test]
    fn missing_argument_is_zero_value() {
        assert_eq!(int_arg(&msg(vec![])).unwrap(), 0);
        assert_eq!(float_arg(&msg(vec![])).unwrap(), 0.0);
        assert_eq!(str_arg(&msg(vec![])).unwrap(), "");
        assert!(!bool_arg(&msg(vec![])).unwrap());
    }

    #[test]
    fn numeric_kinds_cross_convert() {
        assert_eq!(int_arg(&msg(vec![OscType::Float(3.7)])).unwrap(), 3);
        assert_eq!(float_arg(&msg(vec![OscType::Int(5)])).unwrap(), 5.0);
        assert_eq!(int_arg(&msg(vec![OscType::Long(9)])).unwrap(), 9);
        assert_eq!(float_arg(&msg(vec![OscType::Double(0.25)])).unwrap(), 0.25);
    }

    #[test]
    fn strings_parse_and_numbers_format() {
        assert_eq!(int_arg(&msg(vec![OscType::String("42".into())])).unwrap(), 42);
        assert_eq!(
            float_arg(&msg(vec![OscType::String("1.5".into())])).unwrap(),
            1.5
        );
        assert_eq!(str_arg(&msg(vec![OscType::Int(7)])).unwrap(), "7");
        assert_eq!(str_arg(&msg(vec![OscType::Double(0.5)])).unwrap(), "0.5");
    }

    #[test]
    fn bool_conversions() {
        assert!(bool_arg(&msg(vec![OscType::Bool(true)])).unwrap());
        assert!(bool_arg(&msg(vec![OscType::Int(1)])).unwrap());
        assert!(!bool_arg(&msg(vec![OscType::Int(0)])).unwrap());
        assert!(bool_arg(&msg(vec![OscType::Float(0.5)])).unwrap());
        assert!(bool_arg(&msg(vec![OscType::String("true".into())])).unwrap());
        assert!(!bool_arg(&msg(vec![OscType::String("yes".into())])).unwrap());
    }

    #[test]
    fn undefined_conversions_fail_loudly() {
        let blob = msg(vec![OscType::Blob(vec![1, 2, 3])]);
        assert!(matches!(
            int_arg(&blob),
            Err(Error::UnsupportedMessage(_))
        ));
        assert!(matches!(
            bool_arg(&blob),
            Err(Error::UnsupportedMessage(_))
        ));
        let not_a_number = msg(vec![OscType::String("loud".into())]);
        assert!(int_arg(&not_a_number).is_err());
        assert!(float_arg(&not_a_number).is_err());
    }
}
