//! Images, hardware profiles and the catalogs they are resolved from.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Location;

/// Operating system family of an image.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    /// Ubuntu Linux.
    Ubuntu,
    /// Debian GNU/Linux.
    Debian,
    /// `CentOS`.
    CentOs,
    /// Red Hat Enterprise Linux.
    Rhel,
    /// Fedora.
    Fedora,
    /// Amazon Linux.
    AmazonLinux,
    /// Microsoft Windows.
    Windows,
    /// Anything the provider could not classify.
    Unrecognized,
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ubuntu => "ubuntu",
            Self::Debian => "debian",
            Self::CentOs => "centos",
            Self::Rhel => "rhel",
            Self::Fedora => "fedora",
            Self::AmazonLinux => "amazon_linux",
            Self::Windows => "windows",
            Self::Unrecognized => "unrecognized",
        };
        f.write_str(name)
    }
}

/// CPU architecture of an image or hardware profile.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// 32-bit x86.
    X86,
    /// 64-bit x86.
    X86_64,
    /// 64-bit ARM.
    Arm64,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        };
        f.write_str(name)
    }
}

/// A bootable image offered by the provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Image {
    /// Qualified identifier (for example `us-east-1/ami-1234`).
    pub id: String,
    /// Identifier understood by the provider's launch call.
    pub provider_id: String,
    /// Display name.
    pub name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Image version string.
    pub version: Option<String>,
    /// Operating system family.
    pub os_family: OsFamily,
    /// Operating system description (for example `ubuntu-images/24.04`).
    pub os_description: Option<String>,
    /// CPU architecture the image was built for.
    pub architecture: Architecture,
    /// Location the image is bound to; `None` means available everywhere.
    pub location: Option<Location>,
    /// User that owns the initial login on nodes booted from this image.
    pub default_login_user: String,
}

impl Image {
    /// Creates an image whose provider id equals `id`.
    #[must_use]
    pub fn new(id: impl Into<String>, os_family: OsFamily, architecture: Architecture) -> Self {
        let id = id.into();
        Self {
            provider_id: id.clone(),
            id,
            name: None,
            description: None,
            version: None,
            os_family,
            os_description: None,
            architecture,
            location: None,
            default_login_user: String::from("root"),
        }
    }

    /// Sets the provider id.
    #[must_use]
    pub fn with_provider_id(mut self, value: impl Into<String>) -> Self {
        self.provider_id = value.into();
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, value: impl Into<String>) -> Self {
        self.name = Some(value.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, value: impl Into<String>) -> Self {
        self.description = Some(value.into());
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, value: impl Into<String>) -> Self {
        self.version = Some(value.into());
        self
    }

    /// Sets the OS description.
    #[must_use]
    pub fn with_os_description(mut self, value: impl Into<String>) -> Self {
        self.os_description = Some(value.into());
        self
    }

    /// Binds the image to a location.
    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the default login user.
    #[must_use]
    pub fn with_login_user(mut self, value: impl Into<String>) -> Self {
        self.default_login_user = value.into();
        self
    }
}

/// A hardware profile (instance type) offered by the provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Hardware {
    /// Qualified identifier.
    pub id: String,
    /// Identifier understood by the provider's launch call.
    pub provider_id: String,
    /// Virtual CPU count.
    pub cores: u32,
    /// Memory in MiB.
    pub ram_mb: u32,
    /// Local disk in GiB.
    pub disk_gb: u32,
    /// Architectures this profile can boot.
    pub architectures: BTreeSet<Architecture>,
    /// Location the profile is bound to; `None` means available everywhere.
    pub location: Option<Location>,
}

impl Hardware {
    /// Creates an `x86_64` profile whose provider id equals `id`.
    #[must_use]
    pub fn new(id: impl Into<String>, cores: u32, ram_mb: u32) -> Self {
        let id = id.into();
        Self {
            provider_id: id.clone(),
            id,
            cores,
            ram_mb,
            disk_gb: 0,
            architectures: BTreeSet::from([Architecture::X86_64]),
            location: None,
        }
    }

    /// Sets the disk size.
    #[must_use]
    pub const fn with_disk(mut self, disk_gb: u32) -> Self {
        self.disk_gb = disk_gb;
        self
    }

    /// Replaces the supported architectures.
    #[must_use]
    pub fn with_architectures(mut self, values: impl IntoIterator<Item = Architecture>) -> Self {
        self.architectures = values.into_iter().collect();
        self
    }

    /// Binds the profile to a location.
    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Returns `true` when this profile can boot `image`.
    #[must_use]
    pub fn supports(&self, image: &Image) -> bool {
        self.architectures.contains(&image.architecture)
    }
}

/// Everything the template resolver chooses from.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Catalog {
    /// Available images.
    pub images: Vec<Image>,
    /// Available hardware profiles.
    pub hardware: Vec<Hardware>,
    /// Known locations.
    pub locations: Vec<Location>,
}

impl Catalog {
    /// Looks up a location by id.
    #[must_use]
    pub fn location(&self, id: &str) -> Option<&Location> {
        self.locations.iter().find(|location| location.id == id)
    }
}
