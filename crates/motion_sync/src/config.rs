//! Tunables for the reconciliation engine and the RON settings file they live in.
//!
//! Settings files are maps keyed by section name, so several subsystems can share one file:
//!
//! ```ron
//! {
//!     "motion_sync": (
//!         interpolation_delay: 0.15,
//!         snap_distance: 8.0,
//!     ),
//! }
//! ```
//!
//! Keys that are missing from a section keep their defaults.

use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::Path;

use bevy::prelude::Resource;
use serde::de::{DeserializeOwned, DeserializeSeed, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::error::SettingsError;
use crate::snapshot::{AdmissionPolicy, PruneMode};

/// Upper bound for `max_buffer_size` and `velocity_buffer_size`. Rings are allocated in full at
/// spawn.
pub const MAX_HISTORY_LEN: usize = 4096;

/// A value stored under its own section of a settings file.
pub trait Settings: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    const SECTION: &'static str;

    fn validate(&self) -> Result<(), SettingsError> {
        Ok(())
    }
}

/// Per-entity configuration of the reconciliation engine.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// How far behind `now` remote entities are rendered, in seconds.
    pub interpolation_delay: f64,
    /// Inverse time constant of the smoother.
    pub smoothing_rate: f32,
    /// Distance beyond which the rendered position snaps instead of smoothing.
    pub snap_distance: f32,
    /// Scale applied to velocity projections when no bracketing history exists.
    pub extrapolation_multiplier: f32,
    pub max_buffer_size: usize,
    /// Snapshots older than this many seconds are discarded.
    pub max_state_age: f64,
    pub velocity_buffer_size: usize,
    pub admission_policy: AdmissionPolicy,
    pub prune_mode: PruneMode,
    /// Consecutive ticks with enough history required before switching from linear to spline.
    /// Zero switches immediately.
    pub spline_hysteresis_ticks: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interpolation_delay: 0.2,
            smoothing_rate: 10.0,
            snap_distance: 5.0,
            extrapolation_multiplier: 1.2,
            max_buffer_size: 40,
            max_state_age: 1.0,
            velocity_buffer_size: 5,
            admission_policy: AdmissionPolicy::RejectStale,
            prune_mode: PruneMode::Strict,
            spline_hysteresis_ticks: 0,
        }
    }
}

impl Settings for SyncSettings {
    const SECTION: &'static str = "motion_sync";

    fn validate(&self) -> Result<(), SettingsError> {
        non_negative("interpolation_delay", self.interpolation_delay)?;
        non_negative("max_state_age", self.max_state_age)?;
        non_negative("snap_distance", self.snap_distance as f64)?;
        non_negative("extrapolation_multiplier", self.extrapolation_multiplier as f64)?;

        if !(self.smoothing_rate.is_finite() && self.smoothing_rate > 0.0) {
            return Err(SettingsError::Invalid {
                field: "smoothing_rate",
                reason: "must be a positive, finite number",
            });
        }
        history_len("max_buffer_size", self.max_buffer_size)?;
        history_len("velocity_buffer_size", self.velocity_buffer_size)?;
        Ok(())
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), SettingsError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SettingsError::Invalid {
            field,
            reason: "must be a finite number >= 0",
        })
    }
}

fn history_len(field: &'static str, value: usize) -> Result<(), SettingsError> {
    if value == 0 {
        return Err(SettingsError::Invalid {
            field,
            reason: "must hold at least one entry",
        });
    }
    if value > MAX_HISTORY_LEN {
        return Err(SettingsError::Invalid {
            field,
            reason: "exceeds MAX_HISTORY_LEN (4096)",
        });
    }
    Ok(())
}

/// Reads section `S::SECTION` from the settings file at `path`.
///
/// A missing file, an empty file, or a file without the section yields `S::default()`.
pub fn load_section<S: Settings>(path: impl AsRef<Path>) -> Result<S, SettingsError> {
    let path = path.as_ref();
    if !path.exists() {
        warn!(
            "Settings file {:?} not found, using defaults for `{}`",
            path,
            S::SECTION
        );
        return Ok(S::default());
    }

    let content = fs::read_to_string(path)?;
    parse_section(&content)
}

/// Parses section `S::SECTION` out of settings file content and validates it.
pub fn parse_section<S: Settings>(content: &str) -> Result<S, SettingsError> {
    if content.trim().is_empty() {
        return Ok(S::default());
    }

    let mut de = ron::Deserializer::from_str(content)?;
    let section = SectionSeed::<S>(PhantomData)
        .deserialize(&mut de)
        .map_err(|source| SettingsError::Section {
            section: S::SECTION,
            source,
        })?;
    de.end().map_err(|source| SettingsError::Section {
        section: S::SECTION,
        source,
    })?;

    let settings = match section {
        Some(settings) => settings,
        None => {
            debug!("Section `{}` absent, using defaults", S::SECTION);
            S::default()
        }
    };
    settings.validate()?;
    Ok(settings)
}

/// Writes `settings` as a settings file containing only its own section.
pub fn write_section<S: Settings>(
    path: impl AsRef<Path>,
    settings: &S,
) -> Result<(), SettingsError> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }

    let body = ron::ser::to_string_pretty(settings, ron::ser::PrettyConfig::default()).map_err(
        |source| SettingsError::Section {
            section: S::SECTION,
            source,
        },
    )?;
    let indented = body.replace('\n', "\n    ");
    fs::write(path, format!("{{\n    \"{}\": {},\n}}\n", S::SECTION, indented))?;
    Ok(())
}

/// Picks one typed section out of a map of sections, skipping the others.
struct SectionSeed<S>(PhantomData<S>);

impl<'de, S: Settings> DeserializeSeed<'de> for SectionSeed<S> {
    type Value = Option<S>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, S: Settings> Visitor<'de> for SectionSeed<S> {
    type Value = Option<S>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a map of settings sections")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut found = None;
        while let Some(key) = map.next_key::<String>()? {
            if key == S::SECTION {
                found = Some(map.next_value::<S>()?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(found)
    }
}
