//! Parser for the MIT-style realm configuration file (`krb5.conf`).
//!
//! ```text
//! [libdefaults]
//!     default_realm = EXAMPLE.COM
//!     ticket_lifetime = 24h
//!
//! [realms]
//!     EXAMPLE.COM = {
//!         kdc = kdc1.example.com:88
//!         kdc = kdc2.example.com:88
//!     }
//!
//! [domain_realm]
//!     .example.com = EXAMPLE.COM
//! ```
//!
//! Only the relations the credential provider needs have typed accessors;
//! everything else is kept in the generic relation tree.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::AuthError;

/// Ticket lifetime used when the configuration does not set one.
pub const DEFAULT_TICKET_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// A single `tag = value` relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Relation tag.
    pub tag: String,
    /// Relation value.
    pub value: RelationValue,
}

/// Value of a relation: plain text or a `{ ... }` group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationValue {
    /// Plain text value.
    Text(String),
    /// Nested group of relations.
    Group(Vec<Relation>),
}

/// KDC information for one realm.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealmInfo {
    /// KDC addresses, in configuration order.
    pub kdcs: Vec<String>,
    /// Admin server, if configured.
    pub admin_server: Option<String>,
}

/// Parsed realm configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Krb5Conf {
    sections: BTreeMap<String, Vec<Relation>>,
}

impl Krb5Conf {
    /// Parse configuration text.
    pub fn parse(text: &str) -> Result<Self, AuthError> {
        let mut sections: BTreeMap<String, Vec<Relation>> = BTreeMap::new();
        let mut current: Option<String> = None;
        // Open groups: (tag, relations collected so far, line opened on).
        let mut stack: Vec<(String, Vec<Relation>, usize)> = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if stack.is_empty() && line.starts_with('[') {
                let end = line
                    .find(']')
                    .ok_or_else(|| AuthError::krb5(line_no, "unterminated section header"))?;
                let name = line[1..end].trim();
                if name.is_empty() {
                    return Err(AuthError::krb5(line_no, "empty section name"));
                }
                sections.entry(name.to_string()).or_default();
                current = Some(name.to_string());
                continue;
            }

            if current.is_none() {
                if line.starts_with("include") || line.starts_with("module") {
                    tracing::debug!(line = line_no, directive = line, "skipping krb5 directive");
                    continue;
                }
                return Err(AuthError::krb5(line_no, "relation outside of a section"));
            }

            if line.starts_with('}') {
                let (tag, relations, _) = stack
                    .pop()
                    .ok_or_else(|| AuthError::krb5(line_no, "unbalanced '}'"))?;
                let relation = Relation {
                    tag,
                    value: RelationValue::Group(relations),
                };
                push_relation(&mut sections, current.as_deref(), &mut stack, relation);
                continue;
            }

            let (tag, value) = line
                .split_once('=')
                .ok_or_else(|| AuthError::krb5(line_no, format!("expected 'tag = value', got '{line}'")))?;
            let tag = tag.trim();
            let value = value.trim();
            if tag.is_empty() {
                return Err(AuthError::krb5(line_no, "empty relation tag"));
            }

            if value == "{" {
                stack.push((tag.to_string(), Vec::new(), line_no));
                continue;
            }

            let relation = Relation {
                tag: tag.to_string(),
                value: RelationValue::Text(unquote(value).to_string()),
            };
            push_relation(&mut sections, current.as_deref(), &mut stack, relation);
        }

        if let Some((tag, _, opened)) = stack.pop() {
            return Err(AuthError::krb5(
                opened,
                format!("group '{tag}' is never closed"),
            ));
        }

        Ok(Self { sections })
    }

    /// Relations of a top-level section.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&[Relation]> {
        self.sections.get(name).map(Vec::as_slice)
    }

    /// First text value for `tag` in `section`.
    #[must_use]
    pub fn get(&self, section: &str, tag: &str) -> Option<&str> {
        self.section(section)?
            .iter()
            .find_map(|r| match &r.value {
                RelationValue::Text(v) if r.tag == tag => Some(v.as_str()),
                _ => None,
            })
    }

    /// `[libdefaults] default_realm`.
    #[must_use]
    pub fn default_realm(&self) -> Option<&str> {
        self.get("libdefaults", "default_realm")
    }

    /// `[libdefaults] ticket_lifetime`, or [`DEFAULT_TICKET_LIFETIME`].
    pub fn ticket_lifetime(&self) -> Result<Duration, AuthError> {
        self.duration("ticket_lifetime")
            .map(|d| d.unwrap_or(DEFAULT_TICKET_LIFETIME))
    }

    /// `[libdefaults] renew_lifetime`, if configured.
    pub fn renew_lifetime(&self) -> Result<Option<Duration>, AuthError> {
        self.duration("renew_lifetime")
    }

    fn duration(&self, tag: &str) -> Result<Option<Duration>, AuthError> {
        match self.get("libdefaults", tag) {
            None => Ok(None),
            Some(raw) => parse_deltat(raw).map(Some).ok_or_else(|| {
                AuthError::Configuration(format!("invalid {tag} in krb5 configuration: '{raw}'"))
            }),
        }
    }

    /// KDC information for `realm` from the `[realms]` section.
    #[must_use]
    pub fn realm(&self, realm: &str) -> Option<RealmInfo> {
        let group = self.section("realms")?.iter().find_map(|r| match &r.value {
            RelationValue::Group(relations) if r.tag == realm => Some(relations),
            _ => None,
        })?;

        let mut info = RealmInfo::default();
        for relation in group {
            if let RelationValue::Text(value) = &relation.value {
                match relation.tag.as_str() {
                    "kdc" => info.kdcs.push(value.clone()),
                    "admin_server" => info.admin_server = Some(value.clone()),
                    _ => {}
                }
            }
        }
        Some(info)
    }

    /// Realm for a host according to `[domain_realm]`.
    ///
    /// Exact host entries win over `.domain` suffix entries; the longest
    /// matching suffix wins among suffixes.
    #[must_use]
    pub fn realm_for_host(&self, host: &str) -> Option<&str> {
        let host = host.to_ascii_lowercase();
        let mut best: Option<(usize, &str)> = None;

        for relation in self.section("domain_realm")? {
            let RelationValue::Text(realm) = &relation.value else {
                continue;
            };
            let tag = relation.tag.to_ascii_lowercase();
            if tag == host {
                return Some(realm.as_str());
            }
            if tag.starts_with('.')
                && host.ends_with(&tag)
                && best.is_none_or(|(len, _)| tag.len() > len)
            {
                best = Some((tag.len(), realm.as_str()));
            }
        }

        best.map(|(_, realm)| realm)
    }
}

fn push_relation(
    sections: &mut BTreeMap<String, Vec<Relation>>,
    current: Option<&str>,
    stack: &mut [(String, Vec<Relation>, usize)],
    relation: Relation,
) {
    if let Some((_, relations, _)) = stack.last_mut() {
        relations.push(relation);
    } else if let Some(section) = current {
        sections.entry(section.to_string()).or_default().push(relation);
    }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Parse a Kerberos time delta.
///
/// Accepts plain seconds (`36000`), clock form (`10:00` is hours and
/// minutes, `10:00:30` adds seconds) and unit form (`1d2h30m`, `24h`, `90s`).
#[must_use]
pub fn parse_deltat(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    if raw.contains(':') {
        let parts: Vec<u64> = raw
            .split(':')
            .map(|p| p.parse::<u64>().ok())
            .collect::<Option<Vec<_>>>()?;
        return match parts.as_slice() {
            [h, m] if *m < 60 => Some(Duration::from_secs(h * 3600 + m * 60)),
            [h, m, s] if *m < 60 && *s < 60 => Some(Duration::from_secs(h * 3600 + m * 60 + s)),
            _ => None,
        };
    }

    let mut total = 0u64;
    let mut number = String::new();
    for c in raw.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let value: u64 = number.parse().ok()?;
        number.clear();
        let unit = match c {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        total = total.checked_add(value.checked_mul(unit)?)?;
    }
    if !number.is_empty() {
        return None;
    }
    Some(Duration::from_secs(total))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# realm configuration
includedir /etc/krb5.conf.d/

[libdefaults]
    default_realm = EXAMPLE.COM
    ticket_lifetime = 10h
    renew_lifetime = 7d
    dns_lookup_kdc = false

[realms]
    EXAMPLE.COM = {
        kdc = kdc1.example.com:88
        kdc = kdc2.example.com:88
        admin_server = kadmin.example.com
    }
    OTHER.ORG = {
        kdc = "kdc.other.org"
    }

[domain_realm]
    .example.com = EXAMPLE.COM
    .db.example.com = DB.EXAMPLE.COM
    special.example.com = OTHER.ORG
"#;

    #[test]
    fn test_parse_libdefaults() {
        let conf = Krb5Conf::parse(SAMPLE).unwrap();
        assert_eq!(conf.default_realm(), Some("EXAMPLE.COM"));
        assert_eq!(conf.ticket_lifetime().unwrap(), Duration::from_secs(36_000));
        assert_eq!(
            conf.renew_lifetime().unwrap(),
            Some(Duration::from_secs(7 * 86_400))
        );
        assert_eq!(conf.get("libdefaults", "dns_lookup_kdc"), Some("false"));
    }

    #[test]
    fn test_parse_realms() {
        let conf = Krb5Conf::parse(SAMPLE).unwrap();
        let realm = conf.realm("EXAMPLE.COM").unwrap();
        assert_eq!(realm.kdcs, vec!["kdc1.example.com:88", "kdc2.example.com:88"]);
        assert_eq!(realm.admin_server.as_deref(), Some("kadmin.example.com"));
        assert_eq!(conf.realm("OTHER.ORG").unwrap().kdcs, vec!["kdc.other.org"]);
        assert!(conf.realm("MISSING.NET").is_none());
    }

    #[test]
    fn test_domain_realm_lookup() {
        let conf = Krb5Conf::parse(SAMPLE).unwrap();
        assert_eq!(conf.realm_for_host("app.example.com"), Some("EXAMPLE.COM"));
        assert_eq!(conf.realm_for_host("sql1.db.example.com"), Some("DB.EXAMPLE.COM"));
        assert_eq!(conf.realm_for_host("SPECIAL.example.com"), Some("OTHER.ORG"));
        assert_eq!(conf.realm_for_host("example.net"), None);
    }

    #[test]
    fn test_missing_lifetime_uses_default() {
        let conf = Krb5Conf::parse("[libdefaults]\n default_realm = A.B\n").unwrap();
        assert_eq!(conf.ticket_lifetime().unwrap(), DEFAULT_TICKET_LIFETIME);
        assert_eq!(conf.renew_lifetime().unwrap(), None);
    }

    #[test]
    fn test_malformed_input_reports_line() {
        let err = Krb5Conf::parse("[libdefaults]\n default_realm\n").unwrap_err();
        assert!(matches!(err, AuthError::Krb5Conf { line: 2, .. }));

        let err = Krb5Conf::parse("default_realm = X\n").unwrap_err();
        assert!(matches!(err, AuthError::Krb5Conf { line: 1, .. }));

        let err = Krb5Conf::parse("[realms]\n X = {\n kdc = a\n").unwrap_err();
        assert!(matches!(err, AuthError::Krb5Conf { line: 2, .. }));

        let err = Krb5Conf::parse("[realms]\n }\n").unwrap_err();
        assert!(matches!(err, AuthError::Krb5Conf { line: 2, .. }));
    }

    #[test]
    fn test_invalid_lifetime_is_error() {
        let conf = Krb5Conf::parse("[libdefaults]\n ticket_lifetime = forever\n").unwrap();
        assert!(conf.ticket_lifetime().is_err());
    }

    #[test]
    fn test_parse_deltat_forms() {
        assert_eq!(parse_deltat("600"), Some(Duration::from_secs(600)));
        assert_eq!(parse_deltat("10:30"), Some(Duration::from_secs(10 * 3600 + 30 * 60)));
        assert_eq!(parse_deltat("1:00:05"), Some(Duration::from_secs(3605)));
        assert_eq!(parse_deltat("1d2h3m4s"), Some(Duration::from_secs(93_784)));
        assert_eq!(parse_deltat("24h"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_deltat("5x"), None);
        assert_eq!(parse_deltat("10h5"), None);
        assert_eq!(parse_deltat("1:75"), None);
        assert_eq!(parse_deltat(""), None);
    }
}
