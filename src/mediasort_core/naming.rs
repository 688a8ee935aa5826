use std::path::Path;

use crate::mediasort_core::error::Result;

/// Characters that are unsafe in a file or blob name on any supported platform.
const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Return the first name in `name`, `name (1)`, `name (2)`, ... (suffix before
/// the extension) for which `exists` reports false.
///
/// The counter is unbounded; each probe error aborts the resolution.
pub fn resolve_unique_name<F>(desired: &str, mut exists: F) -> Result<String>
where
    F: FnMut(&str) -> Result<bool>,
{
    if !exists(desired)? {
        return Ok(desired.to_string());
    }

    let (base, ext) = split_extension(desired);
    let mut counter: u64 = 1;
    loop {
        let candidate = format!("{} ({}){}", base, counter, ext);
        if !exists(&candidate)? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

/// Split `photo.jpg` into `("photo", ".jpg")`. Names without an extension, and
/// dot-files, keep everything in the base.
pub fn split_extension(name: &str) -> (&str, &str) {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) => name.split_at(name.len() - ext.len() - 1),
        None => (name, ""),
    }
}

/// Replace every character that is illegal in a path or blob name with `_`.
pub fn sanitize_file_name(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_control() || INVALID_NAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}
