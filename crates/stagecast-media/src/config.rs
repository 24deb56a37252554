// crates/stagecast-media/src/config.rs
//
// Decode pipeline configuration block, loaded by the host from its
// `configuration.ffmpeg.producer.*` settings.

use serde::Deserialize;

/// Deinterlacing policy for the video filter chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutoDeinterlace {
    /// Never deinterlace.
    None,
    /// Deinterlace frames the decoder marks as interlaced.
    #[default]
    Interlaced,
    /// Deinterlace everything.
    All,
}

impl AutoDeinterlace {
    /// The value handed to bwdif's `deint` option.
    pub fn bwdif_mode(self) -> Option<&'static str> {
        match self {
            AutoDeinterlace::None => None,
            AutoDeinterlace::Interlaced => Some("interlaced"),
            AutoDeinterlace::All => Some("all"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DecodeConfig {
    /// Decoder thread count; 0 lets the codec pick.
    pub threads: i32,
    pub auto_deinterlace: AutoDeinterlace,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self { threads: 0, auto_deinterlace: AutoDeinterlace::Interlaced }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_environment() {
        let config = DecodeConfig::default();
        assert_eq!(config.threads, 0);
        assert_eq!(config.auto_deinterlace, AutoDeinterlace::Interlaced);
    }

    #[test]
    fn deserializes_from_kebab_case_keys() {
        let config: DecodeConfig =
            serde_json::from_str(r#"{ "threads": 4, "auto-deinterlace": "all" }"#).unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.auto_deinterlace, AutoDeinterlace::All);
        assert_eq!(config.auto_deinterlace.bwdif_mode(), Some("all"));
    }
}
