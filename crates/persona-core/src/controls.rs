use crate::client::CameraFacing;
use crate::settings::Settings;

/// Local media flags for the outbound side of a session.
///
/// The flags only change after the client handle accepted the matching
/// command, so they always describe what the vendor client was told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaControls {
    muted: bool,
    facing: CameraFacing,
}

impl Default for MediaControls {
    fn default() -> Self {
        Self {
            muted: false,
            facing: CameraFacing::Front,
        }
    }
}

impl MediaControls {
    /// Initial flags for a new connect attempt.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            muted: settings.start_muted,
            facing: if settings.prefer_front_camera {
                CameraFacing::Front
            } else {
                CameraFacing::Back
            },
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn facing(&self) -> CameraFacing {
        self.facing
    }

    /// The mute value a toggle would request.
    pub fn toggled_mute(&self) -> bool {
        !self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn set_facing(&mut self, facing: CameraFacing) {
        self.facing = facing;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unmuted_front_camera() {
        let c = MediaControls::default();
        assert!(!c.is_muted());
        assert_eq!(c.facing(), CameraFacing::Front);
    }

    #[test]
    fn from_settings_honours_preferences() {
        let settings = Settings {
            start_muted: true,
            prefer_front_camera: false,
            ..Settings::default()
        };
        let c = MediaControls::from_settings(&settings);
        assert!(c.is_muted());
        assert_eq!(c.facing(), CameraFacing::Back);
        assert!(!c.toggled_mute());
    }

    #[test]
    fn facing_flips_both_ways() {
        assert_eq!(CameraFacing::Front.flipped(), CameraFacing::Back);
        assert_eq!(CameraFacing::Back.flipped(), CameraFacing::Front);
    }
}
