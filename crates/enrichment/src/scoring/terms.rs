//! Word lists used by the scorers.

/// Words that make a "name" look like a business phrase rather than a person.
pub(crate) const GENERIC_BUSINESS_TERMS: &[&str] = &[
    "solutions", "services", "consulting", "group", "holdings", "partners", "company", "corporation",
    "corp", "inc", "llc", "ltd", "limited", "enterprises", "industries", "international", "global",
    "technologies", "technology", "systems", "agency", "studio", "marketing", "sales", "management",
    "team", "department", "office", "support", "customer", "client", "business", "digital", "media",
    "software", "network", "associates", "ventures", "capital", "labs", "staff", "contact", "info",
];

/// Role or title words that are never part of a person's name.
pub(crate) const TITLE_WORDS: &[&str] = &[
    "ceo", "cfo", "cto", "coo", "cmo", "founder", "owner", "president", "director", "manager", "head",
    "vp", "chief", "officer", "executive", "lead", "senior", "junior",
];

/// Context phrases that make an overlap with the company name plausible (e.g. "Smith & Sons").
pub(crate) const FOUNDER_PHRASES: &[&str] = &[
    "founder", "co-founder", "cofounder", "owner", "proprietor", "ceo", "chief executive", "president",
    "managing director", "principal",
];

/// Words in a context snippet that suggest the candidate is a real person.
pub(crate) const PERSON_CONTEXT_WORDS: &[&str] = &[
    "linkedin", "profile", "joined", "leads", "manages", "responsible", "experience", "years",
    "previously", "graduated", "appointed", "serves as", "heads",
];

/// Roles that match most industries' decision makers.
pub(crate) const INDUSTRY_TITLES: &[&str] = &[
    "ceo", "cfo", "cto", "coo", "cmo", "founder", "owner", "president", "director", "head",
    "vice president", "vp", "chief", "partner", "principal", "manager",
];

pub(crate) const PLACEHOLDER_NAMES: &[&str] = &[
    "jane doe", "john doe", "john smith", "jane smith", "test user", "test test", "first last",
    "firstname lastname", "first name last name", "your name", "full name", "name surname",
    "example person", "sample contact", "unknown", "n a", "not available", "anonymous",
];

pub(crate) const PLACEHOLDER_LOCAL_PARTS: &[&str] = &[
    "noreply", "no-reply", "no_reply", "donotreply", "do-not-reply", "test", "test.user", "testuser",
    "info", "contact", "admin", "support", "sales", "hello", "office", "mail", "email", "example",
    "firstname.lastname", "first.last", "firstname", "lastname", "name", "user", "username",
    "webmaster", "postmaster",
];

pub(crate) const PLACEHOLDER_DOMAINS: &[&str] = &[
    "example.com", "example.org", "example.net", "test.com", "domain.com", "email.com", "company.com",
    "yourcompany.com", "yourdomain.com", "mail.com",
];

pub(crate) const PLACEHOLDER_TLDS: &[&str] = &[".test", ".invalid", ".example", ".localhost"];

pub(crate) const FREE_MAIL_DOMAINS: &[&str] = &[
    "gmail.com", "googlemail.com", "yahoo.com", "hotmail.com", "outlook.com", "live.com", "aol.com",
    "icloud.com", "me.com", "proton.me", "protonmail.com", "gmx.com", "gmx.de", "web.de", "yandex.com",
];

pub(crate) const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com", "guerrillamail.com", "10minutemail.com", "tempmail.com", "trashmail.com",
    "yopmail.com", "sharklasers.com", "getnada.com", "dispostable.com", "throwawaymail.com",
];

/// Whether `haystack` (lowercase) contains `term` as a whole word or phrase.
pub(crate) fn contains_word(haystack: &str, term: &str) -> bool {
    haystack.match_indices(term).any(|(start, _)| {
        let end = start + term.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
