//! Curated pattern tables: prompt injection, secrets, prompt leakage,
//! dangerous HTML, and destructive verbs.

use std::sync::LazyLock;

use regex_lite::Regex;

/// A static table entry. Patterns are compile-time constants; a typo is a
/// programming error caught by the tests below.
fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static security pattern must compile")
}

/// Injection patterns, tagged with the kind of attack they indicate.
pub static INJECTION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        // Instruction override
        (
            re(r"(?i)\b(?:ignore|disregard|forget|override|bypass)\b[\s\w,]{0,30}?\b(?:previous|prior|above|earlier|preceding|all|your|system)\b[\s\w]{0,20}?\b(?:instructions?|prompts?|rules|directions|guidelines|context)\b"),
            "instruction_override",
        ),
        (re(r"(?i)\bnew\s+instructions?\s*:"), "instruction_override"),
        (
            re(r"(?i)\bignore[rz]?\s+(?:toutes\s+)?(?:les\s+)?instructions\s+pr[ée]c[ée]dentes"),
            "instruction_override",
        ),
        (
            re(r"(?i)\bignora(?:r)?\s+(?:todas\s+)?(?:las\s+)?instrucciones\s+anteriores"),
            "instruction_override",
        ),
        (
            re(r"(?i)\bignoriere\s+(?:alle\s+)?(?:vorherigen|bisherigen)\s+anweisungen"),
            "instruction_override",
        ),
        // Role hijack
        (re(r"(?i)\byou\s+are\s+now\s+(?:a|an|the|in|my)\b"), "role_hijack"),
        (re(r"(?i)\bpretend\s+(?:to\s+be|you\s+are)\b"), "role_hijack"),
        (
            re(r"(?i)\b(?:act|behave|respond)\s+as\s+(?:if\s+you\s+(?:are|were)\s+)?(?:an?\s+)?(?:unrestricted|unfiltered|uncensored|jailbroken|evil)\b"),
            "role_hijack",
        ),
        (re(r"(?im)^\s*(?:system|assistant)\s*:"), "role_hijack"),
        (re(r"(?i)\[(?:system|admin|instruction)\]"), "role_hijack"),
        (re(r"(?i)</?(?:system|instruction|admin)>"), "role_hijack"),
        // Jailbreak keywords
        (
            re(r"(?i)\b(?:jailbreak|jail\s+break|dan\s+mode|do\s+anything\s+now|god\s+mode)\b"),
            "jailbreak",
        ),
        // System prompt extraction
        (
            re(r"(?i)\b(?:reveal|show|print|display|repeat|output|leak|tell\s+me)\b[\s\w]{0,20}?\b(?:your|the)\s+(?:system\s+prompt|initial\s+(?:prompt|instructions)|hidden\s+(?:prompt|instructions)|original\s+instructions)\b"),
            "prompt_extraction",
        ),
        (
            re(r"(?i)\bwhat\s+(?:is|are)\s+your\s+(?:system\s+prompt|instructions)\b"),
            "prompt_extraction",
        ),
        // Credential extraction
        (
            re(r"(?i)\b(?:reveal|print|leak|dump|expose|show\s+me)\s+(?:your|the|all)\s+(?:api[\s_-]?keys?|secrets?|credentials|env(?:ironment)?\s+variables|passwords)\b"),
            "credential_extraction",
        ),
    ]
});

/// A secret-shaped substring and what to put in its place.
pub struct SecretPattern {
    pub regex: Regex,
    pub replacement: &'static str,
    pub label: &'static str,
}

pub static SECRET_PATTERNS: LazyLock<Vec<SecretPattern>> = LazyLock::new(|| {
    let p = |pattern: &str, replacement: &'static str, label: &'static str| SecretPattern {
        regex: re(pattern),
        replacement,
        label,
    };
    vec![
        p(r"sk-ant-[A-Za-z0-9_\-]{20,}", "[REDACTED]", "Anthropic key"),
        p(r"sk-(?:proj-)?[A-Za-z0-9_\-]{20,}", "[REDACTED]", "API key"),
        p(r"ghp_[A-Za-z0-9]{36,}", "[REDACTED]", "GitHub token"),
        p(r"xox[bprs]-[A-Za-z0-9\-]{10,}", "[REDACTED]", "Slack token"),
        p(r"AKIA[A-Z0-9]{16}", "[REDACTED]", "AWS key"),
        p(r"AIza[0-9A-Za-z_\-]{35}", "[REDACTED]", "Google key"),
        p(r"Bearer\s+[A-Za-z0-9\-._~+/]+=*", "Bearer [REDACTED]", "Bearer token"),
        p(
            r"(?i)\b((?:postgres(?:ql)?|mysql|mariadb|mongodb(?:\+srv)?|redis|amqp)://)[^\s:@/]+:[^\s@/]+@",
            "${1}[REDACTED]@",
            "Connection string credentials",
        ),
        p(
            r#"(?i)\b(api[_-]?key|secret|password|passwd|pwd|token|access[_-]?key)(\s*[=:]\s*)["']?[^\s"',;]+["']?"#,
            "${1}${2}[REDACTED]",
            "Credential assignment",
        ),
    ]
});

/// Phrases that indicate the model is quoting its own instructions.
pub static LEAKAGE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        re(r"(?i)\b(?:my|the)\s+system\s+prompt\s+(?:is|says|reads)\b[^\n]*"),
        re(r"(?i)\bhere\s+(?:are|is)\s+my\s+(?:instructions|system\s+prompt)\b[^\n]*"),
        re(r"(?i)\bmy\s+(?:hidden\s+|original\s+)?instructions\s+(?:are|say)\b[^\n]*"),
        re(r"(?i)\bI\s+was\s+instructed\s+to\s+(?:never|not|always)\b[^\n]*"),
    ]
});

/// Script, frame and event-handler constructs, with their replacements.
/// Handlers and `javascript:` URLs only match inside a tag, so prose such as
/// "one = true" or "JavaScript: a language" passes through.
pub static HTML_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (re(r"(?is)<script\b[^>]*>.*?</script\s*>"), ""),
        (re(r"(?is)<script\b[^>]*/?>"), ""),
        (
            re(r"(?is)<(iframe|object|embed|frameset|frame)\b[^>]*>.*?</(?:iframe|object|embed|frameset|frame)\s*>"),
            "",
        ),
        (re(r"(?is)<(?:iframe|object|embed|frameset|frame)\b[^>]*/?>"), ""),
        (
            re(r#"(?is)(<[a-z][a-z0-9-]*\b[^>]*?)\s+on[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#),
            "${1}",
        ),
        (
            re(r#"(?is)(<[a-z][a-z0-9-]*\b[^>]*?\b(?:href|src|action|formaction)\s*=\s*["']?)\s*javascript\s*:"#),
            "${1}",
        ),
    ]
});

/// Verbs that mark a tool as destructive, with locale equivalents.
pub const DESTRUCTIVE_VERBS: &[&str] = &[
    // English
    "delete", "remove", "cancel", "destroy", "drop", "truncate", "wipe", "clear", "reset", "purge",
    "erase", "revoke", "terminate",
    // French
    "supprimer", "effacer", "annuler", "detruire", "détruire", "vider", "reinitialiser",
    "réinitialiser",
    // Spanish
    "eliminar", "borrar", "cancelar", "destruir", "vaciar", "restablecer",
    // German
    "loeschen", "löschen", "entfernen", "stornieren", "zerstoeren", "zerstören", "leeren",
    "zuruecksetzen", "zurücksetzen",
    // Arabic
    "حذف", "إزالة", "ازالة", "إلغاء", "الغاء", "مسح", "تدمير", "إفراغ",
];

/// Lower-cased words of a tool name split on snake, kebab, dot and camel
/// boundaries: `deleteUserAccount` → `["delete", "user", "account"]`.
pub fn name_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in name.chars() {
        if matches!(c, '_' | '-' | '.' | ' ' | ':' | '/') {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_ascii_digit();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// The destructive verb a tool name contains, if any.
pub fn destructive_verb<'a>(name: &str, extra: &'a [String]) -> Option<&'a str> {
    let words = name_words(name);
    let hit = |verb: &str| {
        let verb = verb.to_lowercase();
        words.iter().any(|w| *w == verb)
    };

    if let Some(verb) = DESTRUCTIVE_VERBS.iter().find(|v| hit(**v)) {
        return Some(*verb);
    }
    extra.iter().map(String::as_str).find(|v| hit(*v))
}

/// Zero-width and bidi-control characters used to hide text.
pub fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
    )
}
