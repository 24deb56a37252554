// crates/stagecast-core/src/variable.rs
//
// Named, typed binding holders. A variable keeps the expression text it was
// created from and whether external callers (scene `call`) may write it.

use crate::binding::{Binding, ToStringBinding};
use crate::error::CoreError;

/// The binding behind a variable, tagged by type.
#[derive(Clone)]
pub enum VariableValue {
    Number(Binding<f64>),
    Integer(Binding<i64>),
    Text(Binding<String>),
    Boolean(Binding<bool>),
}

pub struct Variable {
    original_expr: String,
    is_public:     bool,
    value:         VariableValue,
}

impl Variable {
    pub fn new(original_expr: impl Into<String>, is_public: bool, value: VariableValue) -> Self {
        Self { original_expr: original_expr.into(), is_public, value }
    }

    pub fn number(original_expr: impl Into<String>, is_public: bool, initial: f64) -> Self {
        Self::new(original_expr, is_public, VariableValue::Number(Binding::new(initial)))
    }

    pub fn integer(original_expr: impl Into<String>, is_public: bool, initial: i64) -> Self {
        Self::new(original_expr, is_public, VariableValue::Integer(Binding::new(initial)))
    }

    pub fn text(original_expr: impl Into<String>, is_public: bool, initial: String) -> Self {
        Self::new(original_expr, is_public, VariableValue::Text(Binding::new(initial)))
    }

    pub fn boolean(original_expr: impl Into<String>, is_public: bool, initial: bool) -> Self {
        Self::new(original_expr, is_public, VariableValue::Boolean(Binding::new(initial)))
    }

    pub fn original_expr(&self) -> &str {
        &self.original_expr
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn value(&self) -> &VariableValue {
        &self.value
    }

    pub fn as_number(&self) -> Option<Binding<f64>> {
        match &self.value {
            VariableValue::Number(b) => Some(b.clone()),
            VariableValue::Integer(b) => Some(b.as_f64()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<Binding<String>> {
        match &self.value {
            VariableValue::Text(b) => Some(b.clone()),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<Binding<bool>> {
        match &self.value {
            VariableValue::Boolean(b) => Some(b.clone()),
            _ => None,
        }
    }

    /// Parse `raw` according to the variable's type and assign it.
    pub fn from_string(&self, raw: &str) -> Result<(), CoreError> {
        let parse_err = |what: &str| CoreError::User(format!("{raw} is not a valid {what}"));
        let set_err = |_| CoreError::User("variable is bound to an expression".into());

        match &self.value {
            VariableValue::Number(b) => {
                let parsed = raw.parse::<f64>().map_err(|_| parse_err("number"))?;
                b.set(parsed).map_err(set_err)
            }
            VariableValue::Integer(b) => {
                let parsed = raw.parse::<i64>().map_err(|_| parse_err("integer"))?;
                b.set(parsed).map_err(set_err)
            }
            VariableValue::Text(b) => b.set(raw.to_string()).map_err(set_err),
            VariableValue::Boolean(b) => {
                let parsed = raw.parse::<bool>().map_err(|_| parse_err("boolean"))?;
                b.set(parsed).map_err(set_err)
            }
        }
    }

    pub fn to_string_value(&self) -> String {
        match &self.value {
            VariableValue::Number(b) => b.stringified().get(),
            VariableValue::Integer(b) => b.get().to_string(),
            VariableValue::Text(b) => b.get(),
            VariableValue::Boolean(b) => b.get().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_string_parses_by_type() {
        let n = Variable::number("0", true, 0.0);
        n.from_string("2.5").unwrap();
        assert_eq!(n.as_number().unwrap().get(), 2.5);

        let b = Variable::boolean("false", true, false);
        b.from_string("true").unwrap();
        assert!(b.as_boolean().unwrap().get());

        assert!(n.from_string("not-a-number").is_err());
    }

    #[test]
    fn integer_widens_to_number() {
        let i = Variable::integer("0", true, 7);
        assert_eq!(i.as_number().unwrap().get(), 7.0);
    }

    #[test]
    fn to_string_round_trips() {
        let v = Variable::number("0", true, 4.0);
        assert_eq!(v.to_string_value(), "4");
        v.from_string("1.25").unwrap();
        assert_eq!(v.to_string_value(), "1.25");
    }
}
