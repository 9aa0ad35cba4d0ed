//! Text canonicalization for descriptions and vendor names.
//!
//! `normalize` is pure and deterministic; its output is used as the Tier 1
//! cache key, the vendor alias pattern and the matcher's comparison text.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_APOSTROPHE: Lazy<Regex> = Lazy::new(|| Regex::new(r"['’`]").unwrap());
static RE_NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").unwrap());
static RE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Canonical comparison key: uppercased, punctuation removed, trailing
/// reference numbers dropped, whitespace collapsed.
///
/// Trailing tokens made only of digits are treated as store numbers or
/// transaction references and removed. If that would leave nothing, the
/// digits are kept so a non-empty input never yields an empty key.
pub fn normalize(raw: &str) -> String {
    let upper = raw.to_uppercase();
    let joined = RE_APOSTROPHE.replace_all(&upper, "");
    let spaced = RE_NON_WORD.replace_all(&joined, " ");
    let collapsed = RE_SPACES.replace_all(spaced.trim(), " ");

    let tokens: Vec<&str> = collapsed.split(' ').filter(|t| !t.is_empty()).collect();
    let mut keep = tokens.len();
    while keep > 0 && tokens[keep - 1].chars().all(|c| c.is_ascii_digit()) {
        keep -= 1;
    }
    if keep == 0 {
        return tokens.join(" ");
    }
    tokens[..keep].join(" ")
}

/// Whitespace tokens of an already-normalized key.
pub fn tokens(normalized: &str) -> Vec<&str> {
    normalized.split(' ').filter(|t| !t.is_empty()).collect()
}

/// True when `needle`'s tokens appear contiguously in `haystack`.
pub fn contains_tokens(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    format!(" {haystack} ").contains(&format!(" {needle} "))
}

/// Stable hash of raw description text, used as the description cache key.
pub fn description_hash(raw: &str) -> String {
    blake3::hash(raw.trim().as_bytes()).to_hex().to_string()
}

/// Truncates to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// More specific spellings first.
static VENDOR_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        // Airlines
        (r"\bDELTA\b|\bDELTA AIR\b", "Delta Airlines"),
        (r"\bAMERICAN\b|\bAMERICAN AIR", "American Airlines"),
        (r"\bSOUTHWEST\b", "Southwest Airlines"),
        (r"\bUNITED\b", "United Airlines"),
        // Hotels
        (r"\bHAMPTON INN\b", "Hampton Inn"),
        (r"\bHILTON\b", "Hilton"),
        (r"\bMARRIOTT\b", "Marriott"),
        (r"\bDOUBLETREE\b", "DoubleTree"),
        (r"\bTRIBUTE PORTFOLIO\b", "Tribute Portfolio Hotel"),
        // Car rental
        (r"\bHERTZ\b", "Hertz"),
        (r"\bENTERPRISE\b", "Enterprise"),
        // Parking
        (r"\bRDU\b.*\bPARKING\b|\bRDUAA\b", "RDU Airport Parking"),
        (r"\bPARKING\b", "Parking"),
        // Ride share
        (r"\bLYFT\b", "Lyft"),
        (r"\bUBER\b", "Uber"),
        // Software and subscriptions
        (r"\bCHATGPT\b|\bOPENAI\b", "OpenAI"),
        (r"\bCLAUDE\b|\bCLAUDE\.AI\b", "Anthropic Claude"),
        (r"\bCURSOR\b", "Cursor AI"),
        (r"\bTWILIO\b", "Twilio"),
        (r"\bFOXIT\b", "Foxit"),
        (r"\bFIREFLIES\b", "Fireflies.AI"),
        (r"\bGODADDY\b", "GoDaddy"),
        (r"\bSUPERHUMAN\b", "Superhuman"),
        (r"\bELEVENLABS\b", "ElevenLabs"),
        (r"\bADDIGY\b|\bADIGY\b", "Addigy"),
        (r"\bPYCHARM\b", "JetBrains PyCharm"),
        (r"\bGAMMA\b", "Gamma"),
        (r"\bSTARLINK\b", "Starlink"),
        (r"\bCRYSTAL REPORTS\b", "SAP Crystal Reports"),
        // Utilities
        (r"\bAT&T\b|\bATT\b|\bMOBILE TELEPHONE\b", "AT&T"),
        (r"\bGFIBER\b|\bGOOGLE FIBER\b|\bUTILITIES.*INTERNET\b", "Google Fiber"),
        (r"\bVERIZON\b|\bVZW\b", "Verizon"),
        // Retail and hardware
        (r"\bAMAZON\b", "Amazon"),
        (r"\bBEST BUY\b", "Best Buy"),
        (r"\bWALMART\b", "Walmart"),
        (r"\bDELL\b", "Dell"),
        (r"\bAPPLE\b", "Apple"),
        (r"\bOWL LABS\b", "Owl Labs"),
        (r"\bUPS STORE\b|\bUPS\b.*SHIPPING", "UPS"),
        // Restaurants
        (r"\bCHICK-FIL-A\b|\bCHICKFILA\b", "Chick-fil-A"),
        (r"\bCHILIS\b|\bCHILI'?S\b", "Chilis"),
        (r"\bFIVE GUYS\b", "Five Guys"),
        (r"\bBUFFALO WILD WINGS\b", "Buffalo Wild Wings"),
        (r"\bDOORDASH\b", "DoorDash"),
        (r"\bSTARBUCKS\b", "Starbucks"),
        // Generic travel and meals
        (r"\bFLIGHT\b", "Flight"),
        (r"\bHOTEL\b", "Hotel"),
        (r"\bCAR RENTAL\b|\bRENTAL CAR\b", "Car Rental"),
        (r"\bBREAKFAST\b", "Meal - Breakfast"),
        (r"\bLUNCH\b", "Meal - Lunch"),
        (r"\bDINNER\b", "Meal - Dinner"),
        (r"\bMEAL\b", "Meal"),
    ]
    .into_iter()
    .filter_map(|(pattern, vendor)| {
        Regex::new(&format!("(?i){pattern}"))
            .ok()
            .map(|re| (re, vendor))
    })
    .collect()
});

const PROCESSOR_PREFIXES: &[&str] = &[
    "PAYPAL", "DNH*", "PY", "DMI*", "IAH", "ATL", "MSY", "DFW", "RDU",
];

/// Best-effort canonical vendor name for a free-text description.
pub fn extract_vendor(description: &str) -> String {
    if let Some((_, vendor)) = VENDOR_PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(description))
    {
        return (*vendor).to_string();
    }

    let mut words: Vec<&str> = description.split_whitespace().collect();
    if let Some(first) = words.first() {
        let first_upper = first.to_uppercase();
        if PROCESSOR_PREFIXES
            .iter()
            .any(|p| first_upper.starts_with(p))
        {
            words.remove(0);
        }
    }
    match words.len() {
        0 => "Unknown".to_string(),
        1 => words[0].to_string(),
        _ => words[..2].join(" "),
    }
}
