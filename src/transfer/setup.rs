//! Which formats each source flavor is offered as.

use crate::format::{
    self, CUSTOM, DIB, DIBV5, FILE_CONTENTS, FILE_DESCRIPTOR_A, FILE_DESCRIPTOR_W, FormatRegistry,
    FormatSpec, HDROP, HTML, INET_URL_A, INET_URL_W, MediumKinds, PNG, PREFERRED_DROP_EFFECT,
    TEXT, UNICODE_TEXT,
};
use crate::source::{ContentSource, Payload, flavors};

const MEMORY: MediumKinds = MediumKinds::MEMORY;

const TEXT_FORMATS: &[FormatSpec] = &[
    FormatSpec::new(UNICODE_TEXT, MEMORY),
    FormatSpec::new(TEXT, MEMORY),
];

const HTML_FORMATS: &[FormatSpec] = &[FormatSpec::new(HTML, MEMORY)];

const URL_FORMATS: &[FormatSpec] = &[
    FormatSpec::new(FILE_DESCRIPTOR_W, MEMORY),
    FormatSpec::new(FILE_DESCRIPTOR_A, MEMORY),
    FormatSpec::new(FILE_CONTENTS, MediumKinds::MEMORY.union(MediumKinds::STREAM)),
    FormatSpec::new(INET_URL_W, MEMORY),
    FormatSpec::new(INET_URL_A, MEMORY),
];

const IMAGE_FORMATS: &[FormatSpec] = &[
    FormatSpec::new(DIBV5, MEMORY),
    FormatSpec::new(DIB, MEMORY),
    FormatSpec::new(PNG, MEMORY),
    FormatSpec::new(HDROP, MEMORY),
    FormatSpec::new(PREFERRED_DROP_EFFECT, MEMORY),
];

const PROMISE_FORMATS: &[FormatSpec] = &[
    FormatSpec::new(FILE_DESCRIPTOR_W, MEMORY),
    FormatSpec::new(FILE_DESCRIPTOR_A, MEMORY),
    FormatSpec::new(FILE_CONTENTS, MediumKinds::STREAM),
    FormatSpec::new(HDROP, MEMORY),
];

const FILE_FORMATS: &[FormatSpec] = &[
    FormatSpec::new(HDROP, MEMORY),
    FormatSpec::new(FILE_DESCRIPTOR_W, MEMORY),
    FormatSpec::new(FILE_DESCRIPTOR_A, MEMORY),
    FormatSpec::new(FILE_CONTENTS, MediumKinds::STREAM),
];

const CUSTOM_FORMATS: &[FormatSpec] = &[FormatSpec::new(CUSTOM, MEMORY)];

/// Formats produced from `flavor`. Helper flavors (URL data, promise
/// metadata, favicon) produce nothing on their own.
fn formats_for(flavor: &str) -> &'static [FormatSpec] {
    match flavor {
        flavors::TEXT => TEXT_FORMATS,
        flavors::HTML => HTML_FORMATS,
        flavors::URL => URL_FORMATS,
        flavors::NATIVE_IMAGE => IMAGE_FORMATS,
        flavors::FILE_PROMISE => PROMISE_FORMATS,
        flavors::FILE => FILE_FORMATS,
        flavors::CUSTOM => CUSTOM_FORMATS,
        _ => &[],
    }
}

fn is_helper(flavor: &str) -> bool {
    matches!(
        flavor,
        flavors::URL_DATA
            | flavors::URL_PRIVATE
            | flavors::FILE_PROMISE_URL
            | flavors::FILE_PROMISE_DEST_FILENAME
            | flavors::FAVICON
    )
}

/// Build the registry for `source`, in flavor order.
///
/// A format offered by several flavors is registered once, for the first
/// flavor. Unrecognized text flavors are offered under a runtime-registered
/// id named after the flavor.
pub fn registry_for(source: &dyn ContentSource) -> FormatRegistry {
    let mut registry = FormatRegistry::new();
    let mut registered: Vec<FormatSpec> = Vec::new();

    for flavor in source.flavors() {
        let known = formats_for(&flavor);
        if !known.is_empty() {
            for spec in known {
                if registered.iter().any(|seen| seen.format == spec.format) {
                    continue;
                }
                registry.register_builtin(flavor.clone(), *spec);
                registered.push(*spec);
            }
        } else if !is_helper(&flavor)
            && matches!(source.payload(&flavor), Some(Payload::Text(_)))
        {
            let spec = FormatSpec::new(format::register_format_name(&flavor), MEMORY);
            registry.register_builtin(flavor.clone(), spec);
            registered.push(spec);
        } else {
            tracing::trace!(flavor = %flavor, "flavor offers no formats of its own");
        }
    }
    registry
}
