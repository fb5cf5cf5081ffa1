use super::dto::DecisionDto;
use super::expression::{ExpressionLanguage, VariableScope};
use serde_json::Value;

/// First-hit decision table.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionModel {
    pub id: String,
    pub name: String,
    pub inputs: Vec<String>,
    pub output: Option<String>,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub when: Vec<Value>,
    pub then: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionResult {
    /// Output as stored on the evaluation record.
    pub output: Value,
    /// Value of the matched rule, unwrapped; what a result variable receives.
    pub value: Value,
    /// 1-based index of the matched rule.
    pub matched_rule: Option<usize>,
}

impl DecisionModel {
    pub fn from_dto(dto: DecisionDto) -> Self {
        Self {
            name: dto.name.unwrap_or_else(|| dto.id.clone()),
            id: dto.id,
            inputs: dto.inputs,
            output: dto.output,
            rules: dto
                .rules
                .into_iter()
                .map(|r| Rule {
                    when: r.when,
                    then: r.then,
                })
                .collect(),
        }
    }

    /// Evaluates the table. With a named output the result is wrapped in an
    /// object `{output: value}`; no matching rule yields `null`.
    pub fn evaluate(
        &self,
        expressions: &dyn ExpressionLanguage,
        scope: &dyn VariableScope,
    ) -> Result<DecisionResult, String> {
        let mut values = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let value = expressions
                .evaluate(input, scope)
                .map_err(|err| format!("Failed to evaluate input '{input}' of decision '{}': {err}", self.id))?;
            values.push(value);
        }

        for (index, rule) in self.rules.iter().enumerate() {
            let matched = rule
                .when
                .iter()
                .zip(values.iter())
                .all(|(entry, value)| entry_matches(entry, value));
            if matched {
                let output = match &self.output {
                    Some(name) => {
                        let mut map = serde_json::Map::new();
                        map.insert(name.clone(), rule.then.clone());
                        Value::Object(map)
                    }
                    None => rule.then.clone(),
                };
                return Ok(DecisionResult {
                    output,
                    value: rule.then.clone(),
                    matched_rule: Some(index + 1),
                });
            }
        }
        Ok(DecisionResult {
            output: Value::Null,
            value: Value::Null,
            matched_rule: None,
        })
    }
}

/// `null` matches anything; strings starting with a comparison operator
/// compare numerically; everything else must be equal.
fn entry_matches(entry: &Value, value: &Value) -> bool {
    match entry {
        Value::Null => true,
        Value::String(text) => {
            for op in ["<=", ">=", "!=", "<", ">"] {
                if let Some(rest) = text.strip_prefix(op) {
                    let (Ok(bound), Some(actual)) = (rest.trim().parse::<f64>(), value.as_f64()) else {
                        return false;
                    };
                    return match op {
                        "<=" => actual <= bound,
                        ">=" => actual >= bound,
                        "!=" => actual != bound,
                        "<" => actual < bound,
                        _ => actual > bound,
                    };
                }
            }
            value.as_str() == Some(text.as_str())
        }
        Value::Number(n) => value.as_f64().is_some_and(|v| Some(v) == n.as_f64()),
        other => other == value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::dto::RuleDto;
    use crate::model::SimpleExpressionLanguage;
    use serde_json::json;

    fn table() -> DecisionModel {
        DecisionModel::from_dto(DecisionDto {
            id: "discount".to_string(),
            name: None,
            inputs: vec!["=tier".to_string(), "=amount".to_string()],
            output: Some("discount".to_string()),
            rules: vec![
                RuleDto {
                    when: vec![json!("gold"), json!(">= 100")],
                    then: json!(0.2),
                },
                RuleDto {
                    when: vec![json!("gold"), Value::Null],
                    then: json!(0.1),
                },
            ],
        })
    }

    #[test]
    fn first_hit_wins() {
        let scope = json!({"tier": "gold", "amount": 150});
        let scope = scope.as_object().unwrap();
        let result = table().evaluate(&SimpleExpressionLanguage, scope).unwrap();
        assert_eq!(result.output, json!({"discount": 0.2}));
        assert_eq!(result.value, json!(0.2));
        assert_eq!(result.matched_rule, Some(1));
    }

    #[test]
    fn falls_through_to_wildcard_and_null() {
        let small = json!({"tier": "gold", "amount": 10});
        let result = table()
            .evaluate(&SimpleExpressionLanguage, small.as_object().unwrap())
            .unwrap();
        assert_eq!(result.output, json!({"discount": 0.1}));

        let none = json!({"tier": "silver", "amount": 10});
        let result = table()
            .evaluate(&SimpleExpressionLanguage, none.as_object().unwrap())
            .unwrap();
        assert_eq!(result.output, Value::Null);
        assert_eq!(result.matched_rule, None);
    }
}
