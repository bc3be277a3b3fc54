//! Scalar coercion and field-level checks

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Number, Value};

use crate::schema::{FieldDef, FieldKind};

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));
static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?P<days>-?\d+) )?(?:(?:(?P<hours>\d+):)?(?P<minutes>\d+):)?(?P<seconds>\d+)(?:\.\d+)?$")
        .expect("valid regex")
});

/// A failed check: message and code
pub type FieldFailure = (String, &'static str);

fn fail(message: impl Into<String>, code: &'static str) -> FieldFailure {
    (message.into(), code)
}

/// JSON type name used in messages
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn check_range(def: &FieldDef, number: f64) -> Result<(), FieldFailure> {
    if let Some(min) = def.min_value {
        if number < min {
            return Err(fail(
                format!("Ensure this value is greater than or equal to {}.", min),
                "min_value",
            ));
        }
    }
    if let Some(max) = def.max_value {
        if number > max {
            return Err(fail(
                format!("Ensure this value is less than or equal to {}.", max),
                "max_value",
            ));
        }
    }
    Ok(())
}

fn coerce_text(def: &FieldDef, value: &Value) -> Result<String, FieldFailure> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return Err(fail("Not a valid string.", "invalid")),
    };
    if text.trim().is_empty() && !def.blank {
        return Err(fail("This field may not be blank.", "blank"));
    }
    if let Some(max) = def.max_length {
        if text.chars().count() > max {
            return Err(fail(
                format!("Ensure this field has no more than {} characters.", max),
                "max_length",
            ));
        }
    }
    Ok(text)
}

fn parse_duration(text: &str) -> Option<i64> {
    let caps = DURATION.captures(text.trim())?;
    let part = |name: &str| -> i64 {
        caps.name(name)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    Some(part("days") * 86_400 + part("hours") * 3_600 + part("minutes") * 60 + part("seconds"))
}

/// Coerce `value` to the canonical form of `def`, or explain why it cannot be
pub fn coerce_scalar(def: &FieldDef, value: &Value) -> Result<Value, FieldFailure> {
    if value.is_null() {
        return if def.nullable {
            Ok(Value::Null)
        } else {
            Err(fail("This field may not be null.", "null"))
        };
    }

    let coerced = match def.kind {
        FieldKind::Integer | FieldKind::BigInteger => {
            let n = as_integer(value).ok_or_else(|| fail("A valid integer is required.", "invalid"))?;
            check_range(def, n as f64)?;
            Value::from(n)
        }
        FieldKind::Float => {
            let f = as_float(value).ok_or_else(|| fail("A valid number is required.", "invalid"))?;
            check_range(def, f)?;
            Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| fail("A valid number is required.", "invalid"))?
        }
        FieldKind::Boolean => {
            let b = match value {
                Value::Bool(b) => *b,
                Value::Number(n) if n.as_i64() == Some(1) => true,
                Value::Number(n) if n.as_i64() == Some(0) => false,
                Value::String(s) => match s.to_lowercase().as_str() {
                    "true" | "1" | "yes" | "on" => true,
                    "false" | "0" | "no" | "off" => false,
                    _ => return Err(fail("Must be a valid boolean.", "invalid")),
                },
                _ => return Err(fail("Must be a valid boolean.", "invalid")),
            };
            Value::Bool(b)
        }
        FieldKind::Text => Value::String(coerce_text(def, value)?),
        FieldKind::Email => {
            let text = coerce_text(def, value)?;
            if !(text.is_empty() || EMAIL.is_match(&text)) {
                return Err(fail("Enter a valid email address.", "invalid"));
            }
            Value::String(text)
        }
        FieldKind::Date => {
            let text = value.as_str().unwrap_or_default();
            let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| {
                fail(
                    "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.",
                    "invalid",
                )
            })?;
            Value::String(date.format("%Y-%m-%d").to_string())
        }
        FieldKind::DateTime => {
            let text = value.as_str().unwrap_or_default();
            let parsed = DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.to_rfc3339())
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M"))
                        .map(|dt| dt.and_utc().to_rfc3339())
                })
                .map_err(|_| {
                    fail(
                        "Datetime has wrong format. Use one of these formats instead: \
                         YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z].",
                        "invalid",
                    )
                })?;
            Value::String(parsed)
        }
        FieldKind::Duration => {
            let seconds = match value {
                Value::Number(_) => as_integer(value),
                Value::String(s) => parse_duration(s),
                _ => None,
            }
            .ok_or_else(|| {
                fail(
                    "Duration has wrong format. Use one of these formats instead: [DD] [HH:[MM:]]ss[.uuuuuu].",
                    "invalid",
                )
            })?;
            Value::from(seconds)
        }
        FieldKind::Json => value.clone(),
    };

    if let Some(choices) = &def.choices {
        if !choices.contains(&coerced) {
            let shown = match &coerced {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(fail(format!("\"{}\" is not a valid choice.", shown), "invalid_choice"));
        }
    }

    Ok(coerced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_range() {
        let def = FieldDef::new(FieldKind::Integer).min_value(0.0);
        assert_eq!(coerce_scalar(&def, &json!("12")), Ok(json!(12)));
        let (message, code) = coerce_scalar(&def, &json!(-1)).unwrap_err();
        assert_eq!(message, "Ensure this value is greater than or equal to 0.");
        assert_eq!(code, "min_value");
        assert_eq!(coerce_scalar(&def, &json!("x")).unwrap_err().1, "invalid");
    }

    #[test]
    fn test_text_rules() {
        let def = FieldDef::text(3);
        assert_eq!(coerce_scalar(&def, &json!("")).unwrap_err().1, "blank");
        assert_eq!(coerce_scalar(&def, &json!("abcd")).unwrap_err().1, "max_length");
        assert_eq!(coerce_scalar(&def, &Value::Null).unwrap_err().1, "null");
        assert_eq!(coerce_scalar(&def.clone().nullable(), &Value::Null), Ok(Value::Null));
    }

    #[test]
    fn test_email() {
        let def = FieldDef::new(FieldKind::Email);
        assert!(coerce_scalar(&def, &json!("foo@example.com")).is_ok());
        assert_eq!(
            coerce_scalar(&def, &json!("not-an-email")).unwrap_err().0,
            "Enter a valid email address."
        );
    }

    #[test]
    fn test_choices() {
        let def = FieldDef::text(10).choices(["ACTIVE", "INACTIVE"]);
        assert_eq!(coerce_scalar(&def, &json!("ACTIVE")), Ok(json!("ACTIVE")));
        let (message, code) = coerce_scalar(&def, &json!("FOO")).unwrap_err();
        assert_eq!(message, "\"FOO\" is not a valid choice.");
        assert_eq!(code, "invalid_choice");
    }

    #[test]
    fn test_duration_formats() {
        let def = FieldDef::new(FieldKind::Duration);
        assert_eq!(coerce_scalar(&def, &json!(900)), Ok(json!(900)));
        assert_eq!(coerce_scalar(&def, &json!("00:15:00")), Ok(json!(900)));
        assert_eq!(coerce_scalar(&def, &json!("1 00:00:01")), Ok(json!(86_401)));
        assert!(coerce_scalar(&def, &json!("soon")).is_err());
    }

    #[test]
    fn test_dates() {
        let date = FieldDef::new(FieldKind::Date);
        assert_eq!(coerce_scalar(&date, &json!("2024-02-29")), Ok(json!("2024-02-29")));
        assert!(coerce_scalar(&date, &json!("2023-02-29")).is_err());

        let datetime = FieldDef::new(FieldKind::DateTime);
        assert_eq!(
            coerce_scalar(&datetime, &json!("2024-01-01T10:00:00Z")),
            Ok(json!("2024-01-01T10:00:00+00:00"))
        );
        assert_eq!(
            coerce_scalar(&datetime, &json!("2024-01-01T10:00")),
            Ok(json!("2024-01-01T10:00:00+00:00"))
        );
    }

    #[test]
    fn test_boolean() {
        let def = FieldDef::new(FieldKind::Boolean);
        assert_eq!(coerce_scalar(&def, &json!("false")), Ok(json!(false)));
        assert_eq!(coerce_scalar(&def, &json!(1)), Ok(json!(true)));
        assert!(coerce_scalar(&def, &json!("maybe")).is_err());
    }
}
