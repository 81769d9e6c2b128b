// src/cross/platform.rs

//! Target platforms
//!
//! A [`Target`] is one (SDK, SDK version, architecture) triple. Each SDK
//! belongs to an operating system family with a base deployment version and
//! a default set of SDK/architecture pairs.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Operating system families that wheels can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingSystem {
    Android,
    Ios,
    TvOs,
    WatchOs,
}

impl OperatingSystem {
    pub const ALL: [OperatingSystem; 4] = [Self::Android, Self::Ios, Self::TvOs, Self::WatchOs];

    pub fn name(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "iOS",
            Self::TvOs => "tvOS",
            Self::WatchOs => "watchOS",
        }
    }

    /// Minimum deployment version targeted when none is given
    pub fn base_version(self) -> &'static str {
        match self {
            Self::Android => "24",
            Self::Ios => "13.0",
            Self::TvOs => "12.0",
            Self::WatchOs => "4.0",
        }
    }

    /// SDK/architecture pairs built when the OS is named on its own
    pub fn default_sdks(self) -> &'static [(Sdk, &'static str)] {
        match self {
            Self::Android => &[
                (Sdk::Android, "armeabi-v7a"),
                (Sdk::Android, "arm64-v8a"),
                (Sdk::Android, "x86"),
                (Sdk::Android, "x86_64"),
            ],
            Self::Ios => &[
                (Sdk::IPhoneOs, "arm64"),
                (Sdk::IPhoneSimulator, "arm64"),
                (Sdk::IPhoneSimulator, "x86_64"),
            ],
            Self::TvOs => &[
                (Sdk::AppleTvOs, "arm64"),
                (Sdk::AppleTvSimulator, "arm64"),
                (Sdk::AppleTvSimulator, "x86_64"),
            ],
            Self::WatchOs => &[
                (Sdk::WatchOs, "arm64_32"),
                (Sdk::WatchSimulator, "arm64"),
                (Sdk::WatchSimulator, "x86_64"),
            ],
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|os| os.name() == name)
    }

    pub fn is_apple(self) -> bool {
        !matches!(self, Self::Android)
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Platform SDKs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sdk {
    Android,
    IPhoneOs,
    IPhoneSimulator,
    AppleTvOs,
    AppleTvSimulator,
    WatchOs,
    WatchSimulator,
}

impl Sdk {
    pub const ALL: [Sdk; 7] = [
        Self::Android,
        Self::IPhoneOs,
        Self::IPhoneSimulator,
        Self::AppleTvOs,
        Self::AppleTvSimulator,
        Self::WatchOs,
        Self::WatchSimulator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::IPhoneOs => "iphoneos",
            Self::IPhoneSimulator => "iphonesimulator",
            Self::AppleTvOs => "appletvos",
            Self::AppleTvSimulator => "appletvsimulator",
            Self::WatchOs => "watchos",
            Self::WatchSimulator => "watchsimulator",
        }
    }

    pub fn os(self) -> OperatingSystem {
        match self {
            Self::Android => OperatingSystem::Android,
            Self::IPhoneOs | Self::IPhoneSimulator => OperatingSystem::Ios,
            Self::AppleTvOs | Self::AppleTvSimulator => OperatingSystem::TvOs,
            Self::WatchOs | Self::WatchSimulator => OperatingSystem::WatchOs,
        }
    }

    /// Vendor/OS part of the target triplet
    fn triplet_suffix(self) -> &'static str {
        match self {
            Self::Android => "linux-android",
            Self::IPhoneOs => "apple-ios",
            Self::IPhoneSimulator => "apple-ios-simulator",
            Self::AppleTvOs => "apple-tvos",
            Self::AppleTvSimulator => "apple-tvos-simulator",
            Self::WatchOs => "apple-watchos",
            Self::WatchSimulator => "apple-watchos-simulator",
        }
    }
}

impl FromStr for Sdk {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|sdk| sdk.as_str() == s)
            .ok_or_else(|| Error::InvalidTarget(format!("don't know how to build wheels for {s}")))
    }
}

impl fmt::Display for Sdk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub sdk: Sdk,
    pub sdk_version: String,
    pub arch: String,
}

impl Target {
    pub fn new(sdk: Sdk, sdk_version: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            sdk,
            sdk_version: sdk_version.into(),
            arch: arch.into(),
        }
    }

    /// Expand a host description into targets
    ///
    /// Accepts an OS name (`iOS`: every default SDK/arch at the base
    /// version), `sdk:arch` (base version of the SDK's OS), or
    /// `sdk:version:arch`.
    pub fn expand(host: &str) -> Result<Vec<Target>> {
        if let Some(os) = OperatingSystem::from_name(host) {
            return Ok(os
                .default_sdks()
                .iter()
                .map(|(sdk, arch)| Target::new(*sdk, os.base_version(), *arch))
                .collect());
        }

        let parts: Vec<&str> = host.split(':').collect();
        let target = match parts.as_slice() {
            [sdk, arch] if !arch.is_empty() => {
                let sdk: Sdk = sdk.parse()?;
                Target::new(sdk, sdk.os().base_version(), *arch)
            }
            [sdk, version, arch] if !version.is_empty() && !arch.is_empty() => {
                Target::new(sdk.parse()?, *version, *arch)
            }
            _ => {
                return Err(Error::InvalidTarget(format!(
                    "{host}: expected an OS name (android, iOS, tvOS, watchOS), \
                     sdk:arch (e.g. iphoneos:arm64) or sdk:version:arch \
                     (e.g. iphonesimulator:12.0:x86_64)"
                )));
            }
        };
        Ok(vec![target])
    }

    pub fn os(&self) -> OperatingSystem {
        self.sdk.os()
    }

    /// The platform string the target interpreter reports
    /// (`sysconfig.get_platform()`)
    pub fn platform_identifier(&self) -> String {
        match self.sdk {
            Sdk::Android => format!("android-{}-{}", self.sdk_version, self.arch),
            Sdk::IPhoneOs | Sdk::IPhoneSimulator => {
                format!("ios-{}-{}-{}", self.sdk_version, self.arch, self.sdk)
            }
            Sdk::AppleTvOs | Sdk::AppleTvSimulator => {
                format!("tvos-{}-{}-{}", self.sdk_version, self.arch, self.sdk)
            }
            Sdk::WatchOs | Sdk::WatchSimulator => {
                format!("watchos-{}-{}-{}", self.sdk_version, self.arch, self.sdk)
            }
        }
    }

    /// Identifier made safe for paths and wheel tags
    pub fn tag(&self) -> String {
        self.platform_identifier().replace(['-', '.'], "_")
    }

    /// Compiler target triplet (`HOST_TRIPLET` for build scripts)
    pub fn platform_triplet(&self) -> String {
        if self.sdk == Sdk::Android {
            let arch = match self.arch.as_str() {
                "armeabi-v7a" => "armv7a",
                "arm64-v8a" => "aarch64",
                "x86" => "i686",
                other => other,
            };
            if arch == "armv7a" {
                format!("{arch}-linux-androideabi")
            } else {
                format!("{arch}-{}", self.sdk.triplet_suffix())
            }
        } else {
            format!("{}-{}", self.arch, self.sdk.triplet_suffix())
        }
    }

    /// Slice of `Python.xcframework` holding this target's interpreter
    pub fn xcframework_slice(&self) -> Result<&'static str> {
        let slice = match (self.sdk, self.arch.as_str()) {
            (Sdk::IPhoneSimulator, "arm64" | "x86_64") => "ios-arm64_x86_64-simulator",
            (Sdk::IPhoneOs, "arm64") => "ios-arm64",
            (Sdk::AppleTvSimulator, "arm64" | "x86_64") => "tvos-arm64_x86_64-simulator",
            (Sdk::AppleTvOs, "arm64") => "tvos-arm64",
            (Sdk::WatchSimulator, "arm64" | "x86_64") => "watchos-arm64_x86_64-simulator",
            (Sdk::WatchOs, "arm64_32") => "watchos-arm64_32",
            _ => {
                return Err(Error::InvalidTarget(format!(
                    "no Python.xcframework slice for {} on {}",
                    self.sdk, self.arch
                )));
            }
        };
        Ok(slice)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.sdk, self.sdk_version, self.arch)
    }
}
