use std::{
    cmp::Ordering,
    fmt::{self, Display},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::VersionError;

mod properties;
mod settings;
mod store;

pub use properties::{PropertiesReader, ServerPropertiesReader};
pub use settings::ManagerSettings;
pub use store::{ConfigStore, JsonConfigStore, ServerConfig};

/// A Bedrock release number such as `1.21.50.07`.
///
/// The build component is optional because older listings only carry three
/// numbers. The original text is kept so zero padding survives a round trip.
#[derive(Debug, Clone, Eq)]
pub struct BedrockVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: Option<u32>,
    raw: String,
}

/// Update target configured for a server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetVersion {
    #[default]
    LatestStable,
    LatestPreview,
    Exact(BedrockVersion),
}

impl BedrockVersion {
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for BedrockVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for BedrockVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.build.unwrap_or(0)).cmp(&(
            other.major,
            other.minor,
            other.patch,
            other.build.unwrap_or(0),
        ))
    }
}

impl PartialOrd for BedrockVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for BedrockVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for BedrockVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut split = s.split('.');

        let major_str = split.next().filter(|v| !v.is_empty()).ok_or(VersionError::MissingMajor)?;
        let minor_str = split.next().ok_or(VersionError::MissingMinor)?;
        let patch_str = split.next().ok_or(VersionError::MissingPatch)?;
        let build_str = split.next();

        if split.next().is_some() {
            return Err(VersionError::ExtraComponents);
        }

        let major = major_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectMajor(major_str.to_string()))?;

        let minor = minor_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectMinor(minor_str.to_string()))?;

        let patch = patch_str
            .parse::<u32>()
            .map_err(|_| VersionError::IncorrectPatch(patch_str.to_string()))?;

        let build = match build_str {
            Some(b) => Some(
                b.parse::<u32>()
                    .map_err(|_| VersionError::IncorrectBuild(b.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            major,
            minor,
            patch,
            build,
            raw: s.to_string(),
        })
    }
}

impl Display for TargetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetVersion::LatestStable => write!(f, "LATEST"),
            TargetVersion::LatestPreview => write!(f, "PREVIEW"),
            TargetVersion::Exact(v) => write!(f, "{v}"),
        }
    }
}

impl FromStr for TargetVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LATEST" | "STABLE" => Ok(TargetVersion::LatestStable),
            "PREVIEW" => Ok(TargetVersion::LatestPreview),
            _ => BedrockVersion::from_str(s)
                .map(TargetVersion::Exact)
                .map_err(|_| VersionError::UnknownVersionFormat(s.to_string())),
        }
    }
}

impl Serialize for TargetVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TargetVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        TargetVersion::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_four_component_versions() {
        let v: BedrockVersion = "1.21.50.07".parse().unwrap();
        assert_eq!((v.major, v.minor, v.patch, v.build), (1, 21, 50, Some(7)));
        assert_eq!(v.to_string(), "1.21.50.07");
    }

    #[test]
    fn orders_by_numeric_components() {
        let old: BedrockVersion = "1.21.44.01".parse().unwrap();
        let new: BedrockVersion = "1.21.50.07".parse().unwrap();
        assert!(old < new);
        assert_eq!(
            "1.21.50.7".parse::<BedrockVersion>().unwrap(),
            "1.21.50.07".parse::<BedrockVersion>().unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "1.x.3".parse::<BedrockVersion>(),
            Err(VersionError::IncorrectMinor(_))
        ));
        assert!(matches!(
            "1.2.3.4.5".parse::<BedrockVersion>(),
            Err(VersionError::ExtraComponents)
        ));
        assert!(matches!(
            "1.2".parse::<BedrockVersion>(),
            Err(VersionError::MissingPatch)
        ));
    }

    #[test]
    fn target_version_round_trips_through_json() {
        for raw in ["\"LATEST\"", "\"PREVIEW\"", "\"1.21.50.07\""] {
            let target: TargetVersion = serde_json::from_str(raw).unwrap();
            assert_eq!(serde_json::to_string(&target).unwrap(), raw);
        }
        assert!(serde_json::from_str::<TargetVersion>("\"nightly\"").is_err());
    }
}
