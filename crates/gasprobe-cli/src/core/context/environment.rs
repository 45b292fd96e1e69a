use std::collections::hash_map::IntoIter;
use std::collections::HashMap;
use std::ops::Deref;
use std::str::FromStr;

use lazy_static::lazy_static;
use serde_json::{Number, Value};

use crate::core::Error;

static CONFIGURATION_SPECIFICATION: &str = include_str!("../../../../../resources/specification/configuration.json");

lazy_static! {
    static ref IS_ARGUMENT: regex::Regex = regex::Regex::new(r"^--[^=]+=.+$").expect("invalid regex");
}

lazy_static! {
    static ref IS_STRING: regex::Regex = regex::Regex::new(r"^'[^']*'$").expect("invalid regex");
    static ref IS_NUMBER: regex::Regex = regex::Regex::new(r"^[0-9]+(\.[0-9]+)?$").expect("invalid regex");
    static ref IS_EMPTY_ARRAY: regex::Regex = regex::Regex::new(r"^\[\]$").expect("invalid regex");
    static ref IS_ARRAY: regex::Regex = regex::Regex::new(r"^\[.*\]$").expect("invalid regex");
}

#[derive(PartialEq, Eq, Hash, Clone, Debug)]
pub struct JSONPath(Vec<String>);

impl Deref for JSONPath {
    type Target = [String];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl JSONPath {
    pub fn from_str(s: &str) -> Self {
        JSONPath(s.split(".").map(|x| x.to_lowercase().to_string()).collect())
    }
}

/// Maps flat variable names (`ethereum_endpoint`) to their place in the configuration.
#[derive(Debug)]
pub struct VariablesResolver(HashMap<String, JSONPath>);

impl VariablesResolver {
    pub fn initialize() -> Self {
        fn resolve_variables(path: &[String], value: Value) -> HashMap<String, JSONPath> {
            let mut variables = HashMap::new();
            match value {
                Value::Object(fields) => {
                    for (field, value) in fields {
                        variables.extend(resolve_variables(&[path, &[field]].concat(), value))
                    }
                },
                _ => {
                    variables.insert(path.join("_"), JSONPath(path.to_vec()));
                },
            }

            variables
        }

        let specification: Value = serde_json::from_str(CONFIGURATION_SPECIFICATION).expect("invalid specification");

        let mut resolutions = HashMap::new();
        resolutions.insert("profile".to_string(), JSONPath::from_str("profile"));
        resolutions.extend(resolve_variables(&[], specification));

        Self(resolutions)
    }

    pub fn resolve_environment(&self) -> Result<Variables, Error> {
        let variables = envy::prefixed("GASPROBE_")
            .from_env::<HashMap<String, String>>()
            .map_err(|e| Error::Configuration(e.to_string()))?;

        self.resolve_variables(variables)
    }

    /// Resolves `--name=value` overrides given after the subcommand options.
    pub fn resolve_arguments(&self, raw_arguments: &[String]) -> Result<Variables, Error> {
        let mut arguments = HashMap::new();
        for raw_argument in raw_arguments {
            if !IS_ARGUMENT.is_match(raw_argument) {
                return Err(Error::Configuration(format!("invalid argument {}, must be of the form '--xxx=yyy'", raw_argument)));
            }

            let Some((raw_name, raw_value)) = raw_argument.split_once("=") else { continue };

            let name = raw_name.trim().replace("--", "");
            let value = raw_value.to_string();

            arguments.insert(name, value);
        }

        self.resolve_variables(arguments)
    }

    fn resolve_variables(&self, variables: HashMap<String, String>) -> Result<Variables, Error> {
        let mut resolved_variables = HashMap::new();
        for (name, value) in variables {
            if let Some(path) = self.0.get(&name.to_lowercase()) {
                resolved_variables.insert(path.clone(), Self::decode_value(&value)?);
            }
        }

        Ok(Variables(resolved_variables))
    }

    fn decode_value(value: &str) -> Result<Value, Error> {
        Ok(match value {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),

            value if IS_STRING.is_match(value) => Value::String(value[1..value.len() - 1].to_string()),
            value if IS_NUMBER.is_match(value) => Number::from_str(value)
                .map(Value::Number)
                .map_err(|e| Error::Configuration(e.to_string()))?,
            value if IS_EMPTY_ARRAY.is_match(value) => Value::Array(vec![]),
            value if IS_ARRAY.is_match(value) => {
                let mut elements = vec![];
                for value in value[1..value.len() - 1].split(",") {
                    elements.push(Self::decode_value(value.trim())?)
                }

                Value::Array(elements)
            },

            value => Value::String(value.to_string()),
        })
    }
}

pub struct Variables(HashMap<JSONPath, Value>);

impl From<HashMap<JSONPath, Value>> for Variables {
    fn from(map: HashMap<JSONPath, Value>) -> Self {
        Variables(map)
    }
}

impl Variables {
    pub fn get(&self, s: &str) -> Option<&Value> {
        self.0.get(&JSONPath::from_str(s))
    }

    pub fn into_iter(self) -> IntoIter<JSONPath, Value> {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::{json, Number, Value};

    use super::{JSONPath, VariablesResolver};

    #[test]
    fn key_from_variable_works_properly() {
        assert_eq!(JSONPath::from_str("foo-1").0, vec!["foo-1".to_string()]);
        assert_eq!(JSONPath::from_str("FOO-1").0, vec!["foo-1".to_string()]);
        assert_eq!(JSONPath::from_str("Foo-1.Bar-2").0, vec!["foo-1".to_string(), "bar-2".to_string()]);
    }

    #[test]
    fn parse_is_working_properly() {
        let cases = vec![
            ("number_1", "94", Value::Number(Number::from(94))),
            ("number_2", "94.65", Value::Number(Number::from_f64(94.65).unwrap())),
            ("true", "true", Value::Bool(true)),
            ("string_1", "''", Value::String("".to_string())),
            ("string_2", "'9000'", Value::String("9000".to_string())),
            ("array_1", "[]", Value::Array(vec![])),
            ("array_2", "[13939, 420420420]", json!([13939, 420420420])),
            ("any", "0x5e5e", Value::String("0x5e5e".to_string())),
        ];

        let mut resolver = VariablesResolver(HashMap::new());
        for (case, _, _) in &cases {
            resolver.0.insert(case.to_string(), JSONPath::from_str(case));
        }

        for (case, value, expected) in cases {
            let result = resolver.resolve_variables(HashMap::from([(case.to_string(), value.to_string())])).unwrap();
            assert_eq!(result.get(case).unwrap().clone(), expected)
        }
    }

    #[test]
    fn arguments_resolve_to_configuration_paths() {
        let resolver = VariablesResolver::initialize();

        let variables = resolver
            .resolve_arguments(&["--ethereum_endpoint=http://node:8545".to_string(), "--diagnostics_concurrency_limit=2".to_string()])
            .unwrap();

        assert_eq!(variables.get("ethereum.endpoint"), Some(&json!("http://node:8545")));
        assert_eq!(variables.get("diagnostics.concurrency_limit"), Some(&json!(2)));
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let resolver = VariablesResolver::initialize();

        assert!(resolver.resolve_arguments(&["--verbose".to_string()]).is_err());
    }

    #[test]
    fn unknown_variables_are_ignored() {
        let resolver = VariablesResolver::initialize();

        let variables = resolver.resolve_arguments(&["--unknown_key=1".to_string()]).unwrap();

        assert!(variables.into_iter().next().is_none());
    }
}
