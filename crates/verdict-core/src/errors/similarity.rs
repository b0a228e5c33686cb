/// Closest known name to an unknown one, used for "did you mean" hints on config errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosestMatch {
    pub name: String,
    pub similarity: f64,
}

pub fn closest_name<'a>(
    needle: &str,
    hay: impl IntoIterator<Item = &'a str>,
) -> Option<ClosestMatch> {
    // 0.55 is a reasonable heuristic for short identifiers.
    const THRESHOLD: f64 = 0.55;

    let mut best: Option<ClosestMatch> = None;
    for candidate in hay {
        let sim = strsim::normalized_levenshtein(needle, candidate);
        if sim >= THRESHOLD && best.as_ref().map_or(true, |b| sim > b.similarity) {
            best = Some(ClosestMatch {
                name: candidate.to_string(),
                similarity: sim,
            });
        }
    }
    best
}

/// Appends "; did you mean 'x'?" when a close candidate exists.
pub fn with_hint<'a>(
    message: String,
    needle: &str,
    hay: impl IntoIterator<Item = &'a str>,
) -> String {
    match closest_name(needle, hay) {
        Some(hit) => format!("{}; did you mean '{}'?", message, hit.name),
        None => message,
    }
}
