//! Text normalization
//!
//! Rewrites arbitrary input into the plain ASCII prose the text conditioner
//! was trained on: numbers, dates, times, currency and symbols become words.
//! The rules run in a fixed order and `normalize` is idempotent.

use super::numbers::{
    digits_to_words, is_year_like, number_to_words, ordinal_to_words, year_to_words,
};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

macro_rules! re {
    ($name:ident, $pattern:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($pattern).unwrap());
    };
}

// Numbers
re!(NUM_PREFIX_RE, r"#(\d)");
re!(COMMA_NUMBER_RE, r"\d[\d,]+\d");
re!(ORDINAL_RE, r"(?i)\b(\d+)(st|nd|rd|th)\b");
re!(NUM_SUFFIX_RE, r"(?i)(\d)([kmbt])\b");
re!(NUM_LETTER_SPLIT_RE, r"(?i)(\d)([a-z])|([a-z])(\d)");
re!(DATE_RE, r"(^|[^/])(\d\d?[/-]\d\d?[/-]\d\d(?:\d\d)?)($|[^/])");
re!(PHONE_NUMBER_RE, r"\(?\d{3}\)?[-.\s]\d{3}[-.\s]?\d{4}");
re!(TIME_RE, r"(\d\d?):(\d\d)(?::(\d\d))?");
re!(POUNDS_RE, r"£([\d,]*\d+)");
re!(DOLLARS_RE, r"\$([\d.,]*\d+)");
re!(DECIMAL_NUMBER_RE, r"\d+(?:\.\d+)+");
re!(MULTIPLY_RE, r"(\d)\s?\*\s?(\d)");
re!(DIVIDE_RE, r"(\d)\s?/\s?(\d)");
re!(ADD_RE, r"(\d)\s?\+\s?(\d)");
re!(SUBTRACT_RE, r"(\d)?\s?-\s?(\d)");
re!(FRACTION_RE, r"(\d+)/(\d+)");
re!(NUMBER_RE, r"\d+");

// Special patterns
re!(LINK_HEADER_RE, r"(?i)https?://");
re!(DASH_RE, r"(.) - (.)");
re!(DOT_RE, r"(?i)([a-z])\.([a-z])");
re!(PARENTHESES_RE, r"[(\[{][^)\]}]*[)\]}](.)?");

// Cleanup
re!(WHITESPACE_RE, r"\s+");
re!(SPACE_BEFORE_PUNCT_RE, r" ([.?!,])");
re!(ELLIPSIS_RE, r"\.\.\.+");
re!(COMMA_RUN_RE, r",+");
re!(PERIOD_RUN_RE, r"[.,]*\.[.,]*");
re!(EXCLAIM_RUN_RE, r"[.,!]*![.,!]*");
re!(QUESTION_RUN_RE, r"[.,!?]*\?[.,!?]*");

/// Stands in for "..." while the punctuation runs are collapsed.
const ELLIPSIS_MARK: &str = "\u{1}";

static ABBREVIATIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)\bmrs\.", "misuss"),
        (r"(?i)\bms\.", "miss"),
        (r"(?i)\bmr\.", "mister"),
        (r"(?i)\bdrs\.", "doctors"),
        (r"(?i)\bdr\.", "doctor"),
        (r"(?i)\bst\.", "saint"),
        (r"(?i)\bco\.", "company"),
        (r"(?i)\bjr\.", "junior"),
        (r"(?i)\bmaj\.", "major"),
        (r"(?i)\bgen\.", "general"),
        (r"(?i)\brev\.", "reverend"),
        (r"(?i)\blt\.", "lieutenant"),
        (r"(?i)\bhon\.", "honorable"),
        (r"(?i)\bsgt\.", "sergeant"),
        (r"(?i)\bcapt\.", "captain"),
        (r"(?i)\besq\.", "esquire"),
        (r"(?i)\bltd\.", "limited"),
        (r"(?i)\bcol\.", "colonel"),
        (r"(?i)\bft\.", "fort"),
        (r"\bTTS\b", "text to speech"),
        (r"\bkHz\b", "kilohertz"),
        (r"\bHz\b", "hertz"),
        (r"\bKBs\b", "kilobytes"),
        (r"\bKB\b", "kilobyte"),
        (r"\bMBs\b", "megabytes"),
        (r"\bMB\b", "megabyte"),
        (r"\bGBs\b", "gigabytes"),
        (r"\bGB\b", "gigabyte"),
        (r"\bTBs\b", "terabytes"),
        (r"\bTB\b", "terabyte"),
        (r"\bAPIs\b", "a p i's"),
        (r"\bAPI\b", "a p i"),
        (r"\bCLIs\b", "c l i's"),
        (r"\bCLI\b", "c l i"),
        (r"\bCPUs\b", "c p u's"),
        (r"\bCPU\b", "c p u"),
        (r"\bGPUs\b", "g p u's"),
        (r"\bGPU\b", "g p u"),
        (r"\bAve\.", "avenue"),
        (r"\betc\b", "etcetera"),
    ]
    .into_iter()
    .map(|(pattern, word)| (Regex::new(pattern).unwrap(), word))
    .collect()
});

static SPECIAL_CHARACTERS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"@", " at "),
        (r"&", " and "),
        (r"%", " percent "),
        (r":", ". "),
        (r";", ", "),
        (r"\+", " plus "),
        (r"\\", " backslash "),
        (r"~", " about "),
        (r"(^| )<3", " heart "),
        (r"<=", " less than or equal to "),
        (r">=", " greater than or equal to "),
        (r"<", " less than "),
        (r">", " greater than "),
        (r"=", " equals "),
        (r"/", " slash "),
        (r"_", " "),
    ]
    .into_iter()
    .map(|(pattern, word)| (Regex::new(pattern).unwrap(), word))
    .collect()
});

/// Normalize raw text for synthesis.
///
/// Returns an empty string for empty or whitespace-only input; callers treat
/// that as nothing to synthesize.
pub fn normalize(text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return String::new();
    }

    let text = to_ascii(text);
    let text = normalize_numbers(&text);
    let text = normalize_special(&text);
    let text = expand_abbreviations(&text);
    let text = expand_special_characters(&text);
    let text = collapse_whitespace(&text);
    let text = dedup_punctuation(&text);
    finish_sentence(text.trim())
}

/// Fold typographic characters and diacritics to plain ASCII.
pub fn to_ascii(text: &str) -> String {
    let mut mapped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => mapped.push('"'),
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => mapped.push('\''),
            '\u{2026}' => mapped.push_str("..."),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2212}' => {
                mapped.push('-')
            }
            '\u{00A0}' | '\u{2007}' | '\u{202F}' => mapped.push(' '),
            'æ' => mapped.push_str("ae"),
            'Æ' => mapped.push_str("AE"),
            'œ' => mapped.push_str("oe"),
            'Œ' => mapped.push_str("OE"),
            'ß' => mapped.push_str("ss"),
            'ø' => mapped.push('o'),
            'Ø' => mapped.push('O'),
            'ð' | 'đ' => mapped.push('d'),
            'Đ' => mapped.push('D'),
            'þ' => mapped.push_str("th"),
            'ł' => mapped.push('l'),
            'Ł' => mapped.push('L'),
            '\u{FB00}' => mapped.push_str("ff"),
            '\u{FB01}' => mapped.push_str("fi"),
            '\u{FB02}' => mapped.push_str("fl"),
            '\u{FB03}' => mapped.push_str("ffi"),
            '\u{FB04}' => mapped.push_str("ffl"),
            _ => mapped.push(c),
        }
    }
    mapped
        .nfd()
        .filter(|c| !('\u{0300}'..='\u{036F}').contains(c))
        .collect()
}

fn normalize_numbers(text: &str) -> String {
    let text = NUM_PREFIX_RE.replace_all(text, "number $1");
    let text = COMMA_NUMBER_RE.replace_all(&text, |caps: &Captures| caps[0].replace(',', ""));
    let text = ORDINAL_RE.replace_all(&text, |caps: &Captures| match caps[1].parse::<u64>() {
        Ok(n) => ordinal_to_words(n),
        Err(_) => caps[0].to_string(),
    });
    let text = NUM_SUFFIX_RE.replace_all(&text, |caps: &Captures| {
        let scale = match caps[2].to_ascii_lowercase().as_str() {
            "k" => "thousand",
            "m" => "million",
            "b" => "billion",
            _ => "trillion",
        };
        format!("{} {}", &caps[1], scale)
    });

    let mut text = text.into_owned();
    for _ in 0..2 {
        text = NUM_LETTER_SPLIT_RE
            .replace_all(&text, |caps: &Captures| {
                match (caps.get(1), caps.get(2), caps.get(3), caps.get(4)) {
                    (Some(d), Some(l), _, _) => format!("{} {}", d.as_str(), l.as_str()),
                    (_, _, Some(l), Some(d)) => format!("{} {}", l.as_str(), d.as_str()),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned();
    }

    let text = DATE_RE.replace_all(&text, |caps: &Captures| {
        let date = caps[2].split(['/', '-']).collect::<Vec<_>>().join(" dash ");
        format!("{}{}{}", &caps[1], date, &caps[3])
    });
    let text = PHONE_NUMBER_RE.replace_all(&text, |caps: &Captures| {
        let digits: String = caps[0].chars().filter(char::is_ascii_digit).collect();
        if digits.len() != 10 {
            return caps[0].to_string();
        }
        format!(
            "{}, {}, {}",
            spaced_digits(&digits[..3]),
            spaced_digits(&digits[3..6]),
            spaced_digits(&digits[6..])
        )
    });
    let text = TIME_RE.replace_all(&text, |caps: &Captures| {
        expand_time(&caps[1], &caps[2], caps.get(3).map(|m| m.as_str()))
    });
    let text = POUNDS_RE.replace_all(&text, |caps: &Captures| {
        format!("{} pounds", caps[1].replace(',', ""))
    });
    let text = DOLLARS_RE.replace_all(&text, |caps: &Captures| expand_dollars(&caps[1]));
    let text = DECIMAL_NUMBER_RE.replace_all(&text, |caps: &Captures| {
        let mut parts = caps[0].split('.');
        let mut out = parts.next().unwrap_or_default().to_string();
        for frac in parts {
            out.push_str(" point ");
            out.push_str(&spaced_digits(frac));
        }
        out
    });
    let text = MULTIPLY_RE.replace_all(&text, "$1 times $2");
    let text = DIVIDE_RE.replace_all(&text, "$1 over $2");
    let text = ADD_RE.replace_all(&text, "$1 plus $2");
    let text = SUBTRACT_RE.replace_all(&text, |caps: &Captures| {
        let lhs = caps.get(1).map_or("", |m| m.as_str());
        format!("{} minus {}", lhs, &caps[2])
    });
    let text = FRACTION_RE.replace_all(&text, "$1 over $2");
    NUMBER_RE
        .replace_all(&text, |caps: &Captures| match caps[0].parse::<u64>() {
            Ok(n) if is_year_like(n) => year_to_words(n),
            Ok(n) => number_to_words(n),
            Err(_) => digits_to_words(&caps[0]),
        })
        .into_owned()
}

fn spaced_digits(digits: &str) -> String {
    digits
        .chars()
        .map(String::from)
        .collect::<Vec<_>>()
        .join(" ")
}

fn expand_time(hours: &str, minutes: &str, seconds: Option<&str>) -> String {
    let h: u32 = hours.parse().unwrap_or(0);
    let m: u32 = minutes.parse().unwrap_or(0);
    let oh = |two: &str| match two.strip_prefix('0') {
        Some(d) => format!("oh {}", d),
        None => two.to_string(),
    };

    let Some(seconds) = seconds else {
        return match (h, m) {
            (0, 0) => "0".to_string(),
            (h, 0) if h > 12 => format!("{} hundred", hours),
            (_, 0) => format!("{} o'clock", hours),
            _ => format!("{} {}", hours, oh(minutes)),
        };
    };

    let s: u32 = seconds.parse().unwrap_or(0);
    let head = if h != 0 {
        let mins = if m == 0 { "oh oh".to_string() } else { oh(minutes) };
        format!("{} {}", hours, mins)
    } else if m != 0 {
        let secs = if s == 0 { "oh oh".to_string() } else { oh(seconds) };
        return format!("{} {}", minutes, secs);
    } else {
        return seconds.to_string();
    };
    if s == 0 {
        head
    } else {
        format!("{} {}", head, oh(seconds))
    }
}

/// "$19.99" -> "19 dollars, 9 9 cents". Cents are read digit by digit.
fn expand_dollars(amount: &str) -> String {
    let amount = amount.replace(',', "");
    let mut parts = amount.split('.');
    let dollars: u64 = parts.next().and_then(|d| d.parse().ok()).unwrap_or(0);
    let cent_digits = parts.next().unwrap_or("");
    let cents: u64 = cent_digits.parse().unwrap_or(0);

    let dollar_words = format!("{} {}", dollars, if dollars == 1 { "dollar" } else { "dollars" });
    let cent_words = format!(
        "{} {}",
        spaced_digits(cent_digits),
        if cents == 1 { "cent" } else { "cents" }
    );
    match (dollars, cents) {
        (0, 0) => "zero dollars".to_string(),
        (_, 0) => dollar_words,
        (0, _) => cent_words,
        _ => format!("{}, {}", dollar_words, cent_words),
    }
}

fn normalize_special(text: &str) -> String {
    let text = LINK_HEADER_RE.replace_all(text, "h t t p s colon slash slash ");
    let text = DASH_RE.replace_all(&text, "$1, $2");

    // Initialisms overlap ("U.S.A"), so rewrite until nothing matches.
    let mut text = text.into_owned();
    while DOT_RE.is_match(&text) {
        text = DOT_RE.replace_all(&text, "$1 dot $2").into_owned();
    }

    PARENTHESES_RE
        .replace_all(&text, |caps: &Captures| {
            let mut aside: String = caps[0]
                .chars()
                .map(|c| match c {
                    '(' | '[' | '{' | ')' | ']' | '}' => ", ".to_string(),
                    c => c.to_string(),
                })
                .collect();
            if let Some(after) = caps.get(1)
                && matches!(after.as_str(), "$" | "." | "!" | "?" | ",")
            {
                // drop the trailing ", " + after, keep the punctuation
                aside.truncate(aside.len() - 1 - after.as_str().len());
                aside.push_str(after.as_str());
            }
            aside
        })
        .into_owned()
}

fn expand_abbreviations(text: &str) -> String {
    ABBREVIATIONS
        .iter()
        .fold(text.to_string(), |acc, (re, word)| {
            re.replace_all(&acc, *word).into_owned()
        })
}

fn expand_special_characters(text: &str) -> String {
    SPECIAL_CHARACTERS
        .iter()
        .fold(text.to_string(), |acc, (re, word)| {
            re.replace_all(&acc, *word).into_owned()
        })
}

fn collapse_whitespace(text: &str) -> String {
    let text = WHITESPACE_RE.replace_all(text, " ");
    SPACE_BEFORE_PUNCT_RE.replace_all(&text, "$1").into_owned()
}

fn dedup_punctuation(text: &str) -> String {
    let text = ELLIPSIS_RE.replace_all(text, ELLIPSIS_MARK);
    let text = COMMA_RUN_RE.replace_all(&text, ",");
    let text = PERIOD_RUN_RE.replace_all(&text, ".");
    let text = EXCLAIM_RUN_RE.replace_all(&text, "!");
    let text = QUESTION_RUN_RE.replace_all(&text, "?");
    text.replace(ELLIPSIS_MARK, "...")
}

fn finish_sentence(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let mut text = text.to_string();
    if let Some(stripped) = text.strip_suffix(',') {
        text = format!("{}.", stripped.trim_end());
    } else if !text.ends_with(['.', '!', '?']) {
        text.push('.');
    }

    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => text,
    }
}
