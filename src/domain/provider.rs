use {
    super::error::PipelineError,
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// External payment platform that sends webhooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    StoreA,
    StoreB,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::StoreA, Provider::StoreB];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreA => "store_a",
            Self::StoreB => "store_b",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Channel that last authoritatively wrote a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    StoreA,
    StoreB,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoreA => "store_a",
            Self::StoreB => "store_b",
            Self::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<Provider> for Platform {
    fn from(p: Provider) -> Self {
        match p {
            Provider::StoreA => Self::StoreA,
            Provider::StoreB => Self::StoreB,
        }
    }
}

impl TryFrom<&str> for Platform {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "store_a" => Ok(Self::StoreA),
            "store_b" => Ok(Self::StoreB),
            "web" => Ok(Self::Web),
            other => Err(PipelineError::Validation(format!(
                "unknown platform: {other}"
            ))),
        }
    }
}
