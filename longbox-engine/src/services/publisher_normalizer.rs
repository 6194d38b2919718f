//! Publisher name canonicalisation and imprint relationships

/// Variant -> canonical publisher name (all lowercase)
const CANONICAL_PUBLISHERS: &[(&str, &str)] = &[
    ("dc", "dc comics"),
    ("dc comics", "dc comics"),
    ("dc entertainment", "dc comics"),
    ("detective comics", "dc comics"),
    ("marvel", "marvel comics"),
    ("marvel comics", "marvel comics"),
    ("marvel entertainment", "marvel comics"),
    ("marvel worldwide", "marvel comics"),
    ("image", "image comics"),
    ("image comics", "image comics"),
    ("boom", "boom! studios"),
    ("boom!", "boom! studios"),
    ("boom studios", "boom! studios"),
    ("boom! studios", "boom! studios"),
    ("dark horse", "dark horse comics"),
    ("dark horse comics", "dark horse comics"),
    ("idw", "idw publishing"),
    ("idw publishing", "idw publishing"),
    ("dynamite", "dynamite entertainment"),
    ("dynamite entertainment", "dynamite entertainment"),
    ("valiant", "valiant entertainment"),
    ("valiant entertainment", "valiant entertainment"),
    ("oni", "oni press"),
    ("oni press", "oni press"),
    ("archie", "archie comics"),
    ("archie comics", "archie comics"),
    ("titan", "titan comics"),
    ("titan comics", "titan comics"),
    ("aftershock", "aftershock comics"),
    ("aftershock comics", "aftershock comics"),
];

/// Canonical parent -> imprint name fragments
const IMPRINTS: &[(&str, &[&str])] = &[
    (
        "dc comics",
        &["vertigo", "black label", "wildstorm", "young animal", "milestone", "zuda"],
    ),
    ("marvel comics", &["icon", "max", "epic", "marvel knights", "ultimate"]),
    ("image comics", &["skybound", "top cow", "shadowline", "todd mcfarlane"]),
    ("dark horse comics", &["berger books", "dark horse manga"]),
    ("boom! studios", &["archaia", "kaboom", "boom! box", "boom box"]),
    ("idw publishing", &["top shelf"]),
];

fn fold(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical lowercase publisher name; unknown publishers pass through lowercased
pub fn normalize_publisher(name: &str) -> String {
    let folded = fold(name);
    CANONICAL_PUBLISHERS
        .iter()
        .find(|(variant, _)| *variant == folded)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or(folded)
}

/// False if either side is missing, else canonical equality
pub fn publishers_match(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let (a, b) = (normalize_publisher(a), normalize_publisher(b));
            !a.is_empty() && a == b
        }
        _ => false,
    }
}

/// Imprint fragments known for a parent publisher
pub fn imprints_of(parent: &str) -> &'static [&'static str] {
    let canonical = normalize_publisher(parent);
    IMPRINTS
        .iter()
        .find(|(p, _)| *p == canonical)
        .map(|(_, imprints)| *imprints)
        .unwrap_or(&[])
}

/// True if `candidate` names a known imprint of `parent`
///
/// "Vertigo" and "DC Black Label" are imprints of "DC"; a publisher is never
/// its own imprint.
pub fn is_imprint_of(candidate: &str, parent: &str) -> bool {
    let candidate = normalize_publisher(candidate);
    if candidate.is_empty() || candidate == normalize_publisher(parent) {
        return false;
    }
    imprints_of(parent)
        .iter()
        .any(|imprint| contains_phrase(&candidate, imprint))
}

/// Word-boundary containment so "max" does not match "maximum press"
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let words: Vec<&str> = haystack.split(|c: char| !c.is_alphanumeric() && c != '!').collect();
    let phrase_words: Vec<&str> = phrase.split(|c: char| !c.is_alphanumeric() && c != '!').collect();
    if phrase_words.is_empty() || words.len() < phrase_words.len() {
        return false;
    }
    words.windows(phrase_words.len()).any(|w| w == phrase_words.as_slice())
}
