// Copyright 2025 Sebastian Ramacher
// SPDX-License-Identifier: LGPL-3.0-or-later

//! # Codenames, vendors and components
//!
//! The build pipeline supports a closed set of distribution codenames. Each
//! codename belongs to exactly one vendor; the vendor determines the mirror
//! and debootstrap keyring used when creating chroots as well as the
//! component sets considered valid.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use crate::ParseError;

/// Distribution vendors served by the pipeline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Hash, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    /// The Debian archive
    Debian,
    /// The Ubuntu archive
    Ubuntu,
}

impl Vendor {
    /// Archive mirror used to bootstrap chroots.
    pub fn mirror(self) -> &'static str {
        match self {
            Vendor::Debian => "http://ftp.us.debian.org/debian",
            Vendor::Ubuntu => "http://ftp.ubuntu.com/ubuntu",
        }
    }

    /// Keyring passed to debootstrap.
    pub fn keyring(self) -> &'static str {
        match self {
            Vendor::Debian => "/usr/share/keyrings/debian-archive-keyring.gpg",
            Vendor::Ubuntu => "/usr/share/keyrings/ubuntu-archive-keyring.gpg",
        }
    }

    /// Components enabled inside freshly created chroots.
    pub fn bootstrap_components(self) -> &'static [Component] {
        match self {
            Vendor::Debian => &[Component::Main, Component::Contrib, Component::NonFree],
            Vendor::Ubuntu => &[
                Component::Main,
                Component::Restricted,
                Component::Universe,
                Component::Multiverse,
            ],
        }
    }
}

impl Display for Vendor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Vendor::Debian => write!(f, "debian"),
            Vendor::Ubuntu => write!(f, "ubuntu"),
        }
    }
}

macro_rules! codenames {
    ($(($variant:ident, $name:literal, $vendor:ident)),+ $(,)?) => {
        /// Distribution codenames known to the pipeline.
        ///
        /// The suite aliases `unstable`, `testing` and `stable` are listed as
        /// codenames of their own since chroots and repository distributions
        /// may be created under either name.
        #[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Hash, Eq, PartialOrd, Ord)]
        #[serde(rename_all = "lowercase")]
        pub enum Codename {
            $(#[doc = $name] $variant,)+
        }

        impl Codename {
            /// The vendor owning this codename.
            pub fn vendor(self) -> Vendor {
                match self {
                    $(Codename::$variant => Vendor::$vendor,)+
                }
            }

            /// Name as used in configuration files and chroot paths.
            pub fn name(self) -> &'static str {
                match self {
                    $(Codename::$variant => $name,)+
                }
            }
        }

        impl TryFrom<&str> for Codename {
            type Error = ParseError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                match value {
                    $($name => Ok(Codename::$variant),)+
                    _ => Err(ParseError::InvalidCodename),
                }
            }
        }
    };
}

codenames![
    (Sid, "sid", Debian),
    (Squeeze, "squeeze", Debian),
    (Wheezy, "wheezy", Debian),
    (Jessie, "jessie", Debian),
    (Stretch, "stretch", Debian),
    (Buster, "buster", Debian),
    (Unstable, "unstable", Debian),
    (Testing, "testing", Debian),
    (Stable, "stable", Debian),
    (Lucid, "lucid", Ubuntu),
    (Maverick, "maverick", Ubuntu),
    (Natty, "natty", Ubuntu),
    (Oneiric, "oneiric", Ubuntu),
    (Precise, "precise", Ubuntu),
    (Quantal, "quantal", Ubuntu),
    (Raring, "raring", Ubuntu),
    (Saucy, "saucy", Ubuntu),
    (Trusty, "trusty", Ubuntu),
    (Utopic, "utopic", Ubuntu),
    (Vivid, "vivid", Ubuntu),
];

impl Display for Codename {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Codename {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Codename::try_from(s)
    }
}

/// Archive components.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Hash, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// The `main` component
    Main,
    /// The `contrib` component
    Contrib,
    /// The `non-free` component
    #[serde(rename = "non-free")]
    NonFree,
    /// The `restricted` component
    Restricted,
    /// The `universe` component
    Universe,
    /// The `multiverse` component
    Multiverse,
}

impl Component {
    /// Name as used in configuration files and apt source lines.
    pub fn name(self) -> &'static str {
        match self {
            Component::Main => "main",
            Component::Contrib => "contrib",
            Component::NonFree => "non-free",
            Component::Restricted => "restricted",
            Component::Universe => "universe",
            Component::Multiverse => "multiverse",
        }
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<&str> for Component {
    type Error = ParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "main" => Ok(Component::Main),
            "contrib" => Ok(Component::Contrib),
            "non-free" => Ok(Component::NonFree),
            "restricted" => Ok(Component::Restricted),
            "universe" => Ok(Component::Universe),
            "multiverse" => Ok(Component::Multiverse),
            _ => Err(ParseError::InvalidComponent),
        }
    }
}

impl FromStr for Component {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Component::try_from(s)
    }
}

#[cfg(test)]
mod test {
    use super::{Codename, Component, Vendor};

    #[test]
    fn vendor_membership() {
        assert_eq!(Codename::Unstable.vendor(), Vendor::Debian);
        assert_eq!(Codename::Sid.vendor(), Vendor::Debian);
        assert_eq!(Codename::Trusty.vendor(), Vendor::Ubuntu);
    }

    #[test]
    fn codename_roundtrip() {
        for s in ["sid", "unstable", "trusty", "vivid", "stable"] {
            assert_eq!(Codename::try_from(s).unwrap().to_string(), s);
        }
        assert!(Codename::try_from("warty").is_err());
    }

    #[test]
    fn component_roundtrip() {
        for s in ["main", "contrib", "non-free", "restricted", "universe", "multiverse"] {
            assert_eq!(Component::try_from(s).unwrap().to_string(), s);
        }
        assert!(Component::try_from("nonfree").is_err());
    }

    #[test]
    fn mirrors() {
        assert!(Vendor::Debian.mirror().contains("debian"));
        assert!(Vendor::Ubuntu.mirror().contains("ubuntu"));
    }
}
