//! Deterministic names for generated objects.

/// Suffix of every companion `PrometheusRule` name
pub const COMPANION_NAME_SUFFIX: &str = "-absent-metric-alert-rules";

const GROUP_NAME_SEPARATOR: char = '/';

/// Name of the companion resource holding the absence alerts for one
/// Prometheus server.
#[must_use]
pub fn companion_name(prometheus_server: &str) -> String {
    format!("{prometheus_server}{COMPANION_NAME_SUFFIX}")
}

/// Name of a generated group: `<source resource>/<source group>`.
#[must_use]
pub fn group_name(source_name: &str, source_group: &str) -> String {
    format!("{source_name}{GROUP_NAME_SEPARATOR}{source_group}")
}

/// The source resource a generated group was produced for.
///
/// Resource names cannot contain `/`, so everything before the first
/// separator is the source name even when the source group name itself
/// contains slashes.
#[must_use]
pub fn source_of_group(group_name: &str) -> &str {
    group_name
        .split(GROUP_NAME_SEPARATOR)
        .next()
        .unwrap_or_default()
}

/// Alert name for the absence alert of `metric`.
///
/// The words `absent`, both classification values and every `_`/`:`
/// separated token of the metric name are lower-cased, title-cased and
/// concatenated. A word equal to the word emitted right before it is
/// dropped, which keeps `swift_swift_up` from stuttering. Empty words
/// (e.g. a missing classification default) never emit anything.
#[must_use]
pub fn alert_name(classification_a: &str, classification_b: &str, metric: &str) -> String {
    let metric_words = metric.split('_').flat_map(|token| token.split(':'));
    let words = ["absent", classification_a, classification_b]
        .into_iter()
        .chain(metric_words);

    let mut name = String::new();
    let mut prev = String::new();
    for word in words {
        let word = word.to_lowercase();
        if word == prev {
            continue;
        }
        name.push_str(&title_case(&word));
        prev = word;
    }
    name
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
