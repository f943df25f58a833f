use crate::error::Error;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

/// JSON types a request property can be declared as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JsonType {
    Object,
    Array,
    String,
    Number,
    Boolean,
}

impl JsonType {
    fn name(self) -> &'static str {
        match self {
            JsonType::Object => "object",
            JsonType::Array => "array",
            JsonType::String => "string",
            JsonType::Number => "number",
            JsonType::Boolean => "boolean",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            JsonType::Object => value.is_object(),
            JsonType::Array => value.is_array(),
            JsonType::String => value.is_string(),
            JsonType::Number => value.is_number(),
            JsonType::Boolean => value.is_boolean(),
        }
    }
}

/// The accepted shape of a trigger request body.
///
/// Properties not listed here are allowed and ignored.
pub struct RequestSchema {
    pub properties: &'static [(&'static str, JsonType)],
    pub required: &'static [&'static str],
}

impl RequestSchema {
    /// Checks `instance` against the schema and reports the first violation.
    pub fn validate(&self, instance: &Value) -> Result<(), Error> {
        let Some(object) = instance.as_object() else {
            return Err(not_of_type(instance, JsonType::Object));
        };

        for (name, json_type) in self.properties {
            if let Some(value) = object.get(*name) {
                if !json_type.matches(value) {
                    return Err(not_of_type(value, *json_type));
                }
            }
        }

        for name in self.required {
            if !object.contains_key(*name) {
                return Err(Error::InvalidPayload {
                    message: format!("'{}' is a required property", name),
                });
            }
        }

        Ok(())
    }

    /// Validates `instance` and deserialises it into a typed payload.
    pub fn parse<T: DeserializeOwned>(&self, instance: Value) -> Result<T, Error> {
        self.validate(&instance)?;
        serde_json::from_value(instance).map_err(|err| Error::InvalidPayload {
            message: err.to_string(),
        })
    }
}

fn not_of_type(value: &Value, json_type: JsonType) -> Error {
    Error::InvalidPayload {
        message: format!("{} is not of type '{}'", value, json_type.name()),
    }
}

pub const POLICY_MONITOR_SCHEMA: RequestSchema = RequestSchema {
    properties: &[
        ("reports_to_run", JsonType::Array),
        ("project_id", JsonType::String),
        ("bq_output_dataset", JsonType::String),
        ("region", JsonType::String),
        ("google_ads_login_customer_id", JsonType::Number),
        ("customer_ids", JsonType::Array),
        ("use_synthetic_data", JsonType::Boolean),
    ],
    required: &[
        "project_id",
        "bq_output_dataset",
        "region",
        "google_ads_login_customer_id",
        "customer_ids",
    ],
};

pub const AD_POLICY_DATA_SCHEMA: RequestSchema = RequestSchema {
    properties: &[
        ("bq_output_project", JsonType::String),
        ("bq_output_dataset", JsonType::String),
        ("bq_output_table", JsonType::String),
        ("developer_token", JsonType::String),
        ("refresh_token", JsonType::String),
        ("client_id", JsonType::String),
        ("client_secret", JsonType::String),
        ("login_customer_id", JsonType::Number),
        ("customer_ids", JsonType::Array),
    ],
    required: &[
        "bq_output_project",
        "bq_output_dataset",
        "bq_output_table",
        "developer_token",
        "refresh_token",
        "client_id",
        "client_secret",
        "login_customer_id",
        "customer_ids",
    ],
};

/// A credential that must never end up in logs.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("**********")
    }
}

/// Trigger payload of the Ads Policy Monitor function.
#[derive(Debug, Deserialize)]
pub struct PolicyMonitorPayload {
    #[serde(default)]
    pub reports_to_run: Option<Vec<String>>,
    pub project_id: String,
    pub bq_output_dataset: String,
    pub region: String,
    pub google_ads_login_customer_id: i64,
    pub customer_ids: Vec<i64>,
}

/// Trigger payload of the ad policy data function; it carries its own credentials.
#[derive(Debug, Deserialize)]
pub struct AdPolicyDataPayload {
    pub bq_output_project: String,
    pub bq_output_dataset: String,
    pub bq_output_table: String,
    pub developer_token: Secret,
    pub refresh_token: Secret,
    pub client_id: String,
    pub client_secret: Secret,
    pub login_customer_id: i64,
    pub customer_ids: Vec<i64>,
}
