//! Total orderings used to pick the best candidate.
//!
//! Both orderings end with an id comparison so that ties never depend on
//! catalog order.

use std::cmp::Ordering;

use crate::domain::{Hardware, Image};

/// Orders images by OS description, then version, then id. Absent values
/// sort before present ones.
pub(super) fn compare_images(left: &Image, right: &Image) -> Ordering {
    left.os_description
        .cmp(&right.os_description)
        .then_with(|| left.version.cmp(&right.version))
        .then_with(|| left.id.cmp(&right.id))
}

/// Orders hardware so that the maximum is the preferred profile.
///
/// The base order is cores, then RAM, then disk; it is reversed unless
/// `biggest` is set, making the smallest satisfying profile the maximum.
/// With `fastest`, cores compare first regardless of direction. Remaining
/// ties prefer the lexicographically smallest id.
pub(super) fn compare_hardware(
    left: &Hardware,
    right: &Hardware,
    biggest: bool,
    fastest: bool,
) -> Ordering {
    let size = left
        .cores
        .cmp(&right.cores)
        .then_with(|| left.ram_mb.cmp(&right.ram_mb))
        .then_with(|| left.disk_gb.cmp(&right.disk_gb));
    let directed = if biggest { size } else { size.reverse() };
    let ranked = if fastest {
        left.cores.cmp(&right.cores).then(directed)
    } else {
        directed
    };
    ranked.then_with(|| right.id.cmp(&left.id))
}
