//! ModelVariant - the twelve SpeechMix model types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Composite model type. `Hf*` variants fetch both halves from the Hugging
/// Face Hub; the others read local checkpoint directories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    SpeechMixEED,
    SpeechMixED,
    SpeechMixSelf,
    SpeechMixAdapt,
    SpeechMixGAN,
    SpeechMixFixed,
    HFSpeechMixEED,
    HFSpeechMixED,
    HFSpeechMixSelf,
    HFSpeechMixAdapt,
    HFSpeechMixGAN,
    HFSpeechMixFixed,
}

impl Default for ModelVariant {
    fn default() -> Self {
        Self::SpeechMixEED
    }
}

impl ModelVariant {
    pub const ALL: [ModelVariant; 12] = [
        Self::SpeechMixEED,
        Self::SpeechMixED,
        Self::SpeechMixSelf,
        Self::SpeechMixAdapt,
        Self::SpeechMixGAN,
        Self::SpeechMixFixed,
        Self::HFSpeechMixEED,
        Self::HFSpeechMixED,
        Self::HFSpeechMixSelf,
        Self::HFSpeechMixAdapt,
        Self::HFSpeechMixGAN,
        Self::HFSpeechMixFixed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::SpeechMixEED => "SpeechMixEED",
            Self::SpeechMixED => "SpeechMixED",
            Self::SpeechMixSelf => "SpeechMixSelf",
            Self::SpeechMixAdapt => "SpeechMixAdapt",
            Self::SpeechMixGAN => "SpeechMixGAN",
            Self::SpeechMixFixed => "SpeechMixFixed",
            Self::HFSpeechMixEED => "HFSpeechMixEED",
            Self::HFSpeechMixED => "HFSpeechMixED",
            Self::HFSpeechMixSelf => "HFSpeechMixSelf",
            Self::HFSpeechMixAdapt => "HFSpeechMixAdapt",
            Self::HFSpeechMixGAN => "HFSpeechMixGAN",
            Self::HFSpeechMixFixed => "HFSpeechMixFixed",
        }
    }

    /// Both halves are Hub repositories rather than local directories.
    pub fn hub_sources(self) -> bool {
        matches!(
            self,
            Self::HFSpeechMixEED
                | Self::HFSpeechMixED
                | Self::HFSpeechMixSelf
                | Self::HFSpeechMixAdapt
                | Self::HFSpeechMixGAN
                | Self::HFSpeechMixFixed
        )
    }

    /// Projected speech goes through the text encoder before the decoder.
    /// Only the ED variants feed the decoder's cross attention directly.
    pub fn routes_through_text_encoder(self) -> bool {
        !matches!(self, Self::SpeechMixED | Self::HFSpeechMixED)
    }

    /// Labels are produced by greedy decoding of the text model.
    pub fn self_labeled(self) -> bool {
        matches!(
            self,
            Self::SpeechMixSelf | Self::HFSpeechMixSelf | Self::SpeechMixGAN | Self::HFSpeechMixGAN
        )
    }

    pub fn adversarial(self) -> bool {
        matches!(self, Self::SpeechMixGAN | Self::HFSpeechMixGAN)
    }

    pub fn length_adapter(self) -> bool {
        matches!(self, Self::SpeechMixAdapt | Self::HFSpeechMixAdapt)
    }

    pub fn forces_fixed_parameters(self) -> bool {
        matches!(self, Self::SpeechMixFixed | Self::HFSpeechMixFixed)
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown model variant '{s}'"))
    }
}
