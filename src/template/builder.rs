//! Constraint builder and the candidate resolution algorithm.

use std::fmt;

use regex::Regex;

use super::ordering::{compare_hardware, compare_images};
use super::{ResolveError, Template, TemplateOptions};
use crate::domain::{Architecture, Catalog, Hardware, Image, Location, OsFamily};

/// Constraints over images, hardware and location.
///
/// Text constraints on images accept either a literal substring or a regular
/// expression that must match the whole field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TemplateBuilder {
    image_id: Option<String>,
    hardware_id: Option<String>,
    location_id: Option<String>,
    os_family: Option<OsFamily>,
    os_description: Option<String>,
    image_version: Option<String>,
    image_name: Option<String>,
    image_description: Option<String>,
    architecture: Option<Architecture>,
    min_cores: u32,
    min_ram_mb: u32,
    min_disk_gb: u32,
    biggest: bool,
    fastest: bool,
    fallback_location: Option<String>,
    options: TemplateOptions,
}

impl TemplateBuilder {
    /// Creates a builder with no constraints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins the image. Other image constraints are cleared; they are refilled
    /// from the chosen image during resolution.
    #[must_use]
    pub fn image_id(mut self, id: impl Into<String>) -> Self {
        self.image_id = Some(id.into());
        self.os_family = None;
        self.os_description = None;
        self.image_version = None;
        self.image_name = None;
        self.image_description = None;
        self.architecture = None;
        self
    }

    /// Pins the hardware profile.
    #[must_use]
    pub fn hardware_id(mut self, id: impl Into<String>) -> Self {
        self.hardware_id = Some(id.into());
        self
    }

    /// Pins the location.
    #[must_use]
    pub fn location_id(mut self, id: impl Into<String>) -> Self {
        self.location_id = Some(id.into());
        self
    }

    /// Requires an OS family.
    #[must_use]
    pub const fn os_family(mut self, family: OsFamily) -> Self {
        self.os_family = Some(family);
        self
    }

    /// Requires the OS description to contain or match `pattern`.
    #[must_use]
    pub fn os_description_matches(mut self, pattern: impl Into<String>) -> Self {
        self.os_description = Some(pattern.into());
        self
    }

    /// Requires the image version to contain or match `pattern`.
    #[must_use]
    pub fn image_version_matches(mut self, pattern: impl Into<String>) -> Self {
        self.image_version = Some(pattern.into());
        self
    }

    /// Requires the image name to contain or match `pattern`.
    #[must_use]
    pub fn image_name_matches(mut self, pattern: impl Into<String>) -> Self {
        self.image_name = Some(pattern.into());
        self
    }

    /// Requires the image description to contain or match `pattern`.
    #[must_use]
    pub fn image_description_matches(mut self, pattern: impl Into<String>) -> Self {
        self.image_description = Some(pattern.into());
        self
    }

    /// Requires an architecture.
    #[must_use]
    pub const fn architecture(mut self, architecture: Architecture) -> Self {
        self.architecture = Some(architecture);
        self
    }

    /// Requires at least `cores` virtual CPUs.
    #[must_use]
    pub const fn min_cores(mut self, cores: u32) -> Self {
        self.min_cores = cores;
        self
    }

    /// Requires at least `ram_mb` MiB of memory.
    #[must_use]
    pub const fn min_ram(mut self, ram_mb: u32) -> Self {
        self.min_ram_mb = ram_mb;
        self
    }

    /// Requires at least `disk_gb` GiB of disk.
    #[must_use]
    pub const fn min_disk(mut self, disk_gb: u32) -> Self {
        self.min_disk_gb = disk_gb;
        self
    }

    /// Prefers the largest satisfying hardware.
    #[must_use]
    pub const fn biggest(mut self) -> Self {
        self.biggest = true;
        self
    }

    /// Prefers the smallest satisfying hardware (the default).
    #[must_use]
    pub const fn smallest(mut self) -> Self {
        self.biggest = false;
        self.fastest = false;
        self
    }

    /// Prefers the hardware with the most cores.
    #[must_use]
    pub const fn fastest(mut self) -> Self {
        self.fastest = true;
        self
    }

    /// Sets the options carried into the template.
    #[must_use]
    pub fn options(mut self, options: TemplateOptions) -> Self {
        self.options = options;
        self
    }

    /// Location used when neither the constraints nor a pinned image or
    /// hardware profile name one. Applied during resolution, after pinning.
    pub fn default_location(&mut self, id: impl Into<String>) {
        self.fallback_location = Some(id.into());
    }

    /// Currently constrained location id.
    #[must_use]
    pub fn location_constraint(&self) -> Option<&str> {
        self.location_id.as_deref()
    }

    /// Currently constrained OS family.
    #[must_use]
    pub const fn os_family_constraint(&self) -> Option<OsFamily> {
        self.os_family
    }

    /// Currently constrained architecture.
    #[must_use]
    pub const fn architecture_constraint(&self) -> Option<Architecture> {
        self.architecture
    }

    /// Resolves the constraints against `catalog`.
    ///
    /// Selecting an image or hardware profile by id back-populates the other
    /// constraints from that candidate, so later filtering stays consistent
    /// with it. Identical catalogs always yield identical templates.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] when a pinned id is unknown, a pattern does
    /// not compile, or no candidate satisfies the constraints.
    pub fn resolve(&mut self, catalog: &Catalog) -> Result<Template, ResolveError> {
        if let Some(id) = self.image_id.clone() {
            let image = catalog
                .images
                .iter()
                .find(|image| image.id == id)
                .ok_or(ResolveError::ImageNotFound {
                    id,
                    catalog_size: catalog.images.len(),
                })?;
            self.populate_from_image(image);
        }
        if let Some(id) = self.hardware_id.clone() {
            let hardware = catalog
                .hardware
                .iter()
                .find(|hardware| hardware.id == id)
                .ok_or(ResolveError::HardwareNotFound {
                    id,
                    catalog_size: catalog.hardware.len(),
                })?;
            self.populate_from_hardware(hardware);
        }
        if self.location_id.is_none() {
            self.location_id.clone_from(&self.fallback_location);
        }

        let target = self.constrained_location(catalog)?;
        let matchers = ImageMatchers::compile(self)?;

        let image = catalog
            .images
            .iter()
            .filter(|image| self.image_matches(image, target.as_ref(), &matchers))
            .max_by(|left, right| compare_images(left, right))
            .ok_or_else(|| ResolveError::NoImageMatch {
                constraints: self.to_string(),
                catalog_size: catalog.images.len(),
            })?;

        let hardware_target = target.clone().or_else(|| image.location.clone());
        let hardware = catalog
            .hardware
            .iter()
            .filter(|hardware| self.hardware_matches(hardware, hardware_target.as_ref(), image))
            .max_by(|left, right| compare_hardware(left, right, self.biggest, self.fastest))
            .ok_or_else(|| ResolveError::NoHardwareMatch {
                constraints: self.to_string(),
                catalog_size: catalog.hardware.len(),
            })?;

        let location = hardware_target
            .or_else(|| hardware.location.clone())
            .or_else(|| {
                catalog
                    .locations
                    .iter()
                    .min_by(|left, right| left.id.cmp(&right.id))
                    .cloned()
            })
            .ok_or_else(|| ResolveError::NoLocation {
                constraints: self.to_string(),
            })?;

        Ok(Template {
            image: image.clone(),
            hardware: hardware.clone(),
            location,
            options: self.options.clone(),
        })
    }

    fn populate_from_image(&mut self, image: &Image) {
        if self.location_id.is_none() {
            self.location_id = image.location.as_ref().map(|location| location.id.clone());
        }
        self.os_family = Some(image.os_family);
        self.architecture = Some(image.architecture);
        self.os_description = image.os_description.as_deref().map(exact);
        self.image_version = image.version.as_deref().map(exact);
        self.image_name = image.name.as_deref().map(exact);
        self.image_description = image.description.as_deref().map(exact);
    }

    fn populate_from_hardware(&mut self, hardware: &Hardware) {
        if self.location_id.is_none() {
            self.location_id = hardware.location.as_ref().map(|location| location.id.clone());
        }
        self.min_cores = hardware.cores;
        self.min_ram_mb = hardware.ram_mb;
        self.min_disk_gb = hardware.disk_gb;
    }

    fn constrained_location(&self, catalog: &Catalog) -> Result<Option<Location>, ResolveError> {
        let Some(id) = self.location_id.as_deref() else {
            return Ok(None);
        };
        find_location(catalog, id)
            .cloned()
            .map(Some)
            .ok_or_else(|| ResolveError::LocationNotFound {
                id: id.to_owned(),
                catalog_size: catalog.locations.len(),
            })
    }

    fn image_matches(
        &self,
        image: &Image,
        target: Option<&Location>,
        matchers: &ImageMatchers,
    ) -> bool {
        self.image_id.as_ref().is_none_or(|id| image.id == *id)
            && target.is_none_or(|location| Location::accepts(image.location.as_ref(), location))
            && self.os_family.is_none_or(|family| image.os_family == family)
            && self
                .architecture
                .is_none_or(|architecture| image.architecture == architecture)
            && matchers.matches(image)
    }

    fn hardware_matches(
        &self,
        hardware: &Hardware,
        target: Option<&Location>,
        image: &Image,
    ) -> bool {
        self.hardware_id.as_ref().is_none_or(|id| hardware.id == *id)
            && target
                .is_none_or(|location| Location::accepts(hardware.location.as_ref(), location))
            && hardware.supports(image)
            && hardware.cores >= self.min_cores
            && hardware.ram_mb >= self.min_ram_mb
            && hardware.disk_gb >= self.min_disk_gb
    }
}

impl fmt::Display for TemplateBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::new();
        let mut push = |name: &str, value: Option<String>| {
            if let Some(text) = value {
                fields.push(format!("{name}={text}"));
            }
        };
        push("image_id", self.image_id.clone());
        push("hardware_id", self.hardware_id.clone());
        push("location", self.location_id.clone());
        push("os_family", self.os_family.map(|family| family.to_string()));
        push("os_description", self.os_description.clone());
        push("image_version", self.image_version.clone());
        push("image_name", self.image_name.clone());
        push("image_description", self.image_description.clone());
        push(
            "architecture",
            self.architecture.map(|architecture| architecture.to_string()),
        );
        push("min_cores", Some(self.min_cores.to_string()));
        push("min_ram_mb", Some(self.min_ram_mb.to_string()));
        push("min_disk_gb", Some(self.min_disk_gb.to_string()));
        push("biggest", Some(self.biggest.to_string()));
        push("fastest", Some(self.fastest.to_string()));
        write!(f, "[{}]", fields.join(", "))
    }
}

fn exact(value: &str) -> String {
    regex::escape(value)
}

fn find_location<'a>(catalog: &'a Catalog, id: &str) -> Option<&'a Location> {
    let bound = catalog
        .images
        .iter()
        .filter_map(|image| image.location.as_ref())
        .chain(
            catalog
                .hardware
                .iter()
                .filter_map(|hardware| hardware.location.as_ref()),
        );
    catalog
        .locations
        .iter()
        .chain(bound)
        .flat_map(|location| std::iter::once(location).chain(location.ancestors()))
        .find(|location| location.id == id)
}

/// Compiled text constraints over images.
struct ImageMatchers {
    os_description: Option<Pattern>,
    version: Option<Pattern>,
    name: Option<Pattern>,
    description: Option<Pattern>,
}

impl ImageMatchers {
    fn compile(builder: &TemplateBuilder) -> Result<Self, ResolveError> {
        Ok(Self {
            os_description: Pattern::compile("os_description", builder.os_description.as_deref())?,
            version: Pattern::compile("image_version", builder.image_version.as_deref())?,
            name: Pattern::compile("image_name", builder.image_name.as_deref())?,
            description: Pattern::compile(
                "image_description",
                builder.image_description.as_deref(),
            )?,
        })
    }

    fn matches(&self, image: &Image) -> bool {
        Pattern::accepts(self.os_description.as_ref(), image.os_description.as_deref())
            && Pattern::accepts(self.version.as_ref(), image.version.as_deref())
            && Pattern::accepts(self.name.as_ref(), image.name.as_deref())
            && Pattern::accepts(self.description.as_ref(), image.description.as_deref())
    }
}

struct Pattern {
    raw: String,
    regex: Regex,
}

impl Pattern {
    fn compile(field: &'static str, raw: Option<&str>) -> Result<Option<Self>, ResolveError> {
        let Some(text) = raw else {
            return Ok(None);
        };
        let regex = Regex::new(&format!("^(?:{text})$")).map_err(|err| {
            ResolveError::InvalidPattern {
                field,
                pattern: text.to_owned(),
                message: err.to_string(),
            }
        })?;
        Ok(Some(Self {
            raw: text.to_owned(),
            regex,
        }))
    }

    fn accepts(pattern: Option<&Self>, value: Option<&str>) -> bool {
        pattern.is_none_or(|pattern| {
            value.is_some_and(|text| text.contains(&pattern.raw) || pattern.regex.is_match(text))
        })
    }
}
