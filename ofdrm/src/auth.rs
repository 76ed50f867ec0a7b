use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/**
    Identity a request is signed for.

    Built once per login and never mutated while a request is in flight;
    re-authenticating means building a new identity.
*/
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub user_id: String,
    pub user_agent: String,
    pub x_bc: String,
    pub cookie: String,
}

impl AuthIdentity {
    /**
        Reject identities with any blank field so that nothing is ever
        signed with empty credentials.
    */
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("user_id", &self.user_id),
            ("user_agent", &self.user_agent),
            ("x_bc", &self.x_bc),
            ("cookie", &self.cookie),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(Error::Auth(format!("{name} is empty")));
            }
        }
        Ok(())
    }

    /**
        Fill derived fields and reduce the cookie to the session pair.

        A missing user id comes from the `auth_id` cookie and a missing
        X-BC from the `fp` cookie.
    */
    pub fn normalized(mut self) -> Self {
        if self.user_id.is_empty() {
            self.user_id = find_cookie(&self.cookie, "auth_id").unwrap_or_default();
        } else {
            if !self.cookie.ends_with(';') {
                self.cookie.push(';');
            }
            self.cookie.push_str("user_id=");
            self.cookie.push_str(&self.user_id);
        }
        if self.x_bc.is_empty() {
            self.x_bc = find_cookie(&self.cookie, "fp").unwrap_or_default();
        }
        self.cookie = session_cookie(&self.cookie);
        self
    }
}

/**
    Parses `user_id:=.. || user_agent:=.. || x_bc:=.. || cookie:=..`.
    Unknown keys are ignored and repeated `cookie` entries accumulate.
*/
impl FromStr for AuthIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut identity = AuthIdentity::default();
        for part in s.split("||") {
            let Some((key, value)) = part.split_once(":=") else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "user_id" => identity.user_id = value.to_string(),
                "user_agent" => identity.user_agent = value.to_string(),
                "x_bc" => identity.x_bc = value.to_string(),
                "cookie" => {
                    if !identity.cookie.is_empty() && !identity.cookie.ends_with(';') {
                        identity.cookie.push(';');
                    }
                    identity.cookie.push_str(value);
                }
                _ => {}
            }
        }
        let identity = identity.normalized();
        identity.validate()?;
        Ok(identity)
    }
}

impl fmt::Display for AuthIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user_id:={} || user_agent:={} || x_bc:={} || cookie:={}",
            self.user_id, self.user_agent, self.x_bc, self.cookie
        )
    }
}

/// Iterate `name=value` pairs of a cookie header.
pub fn cookie_pairs(cookie: &str) -> impl Iterator<Item = (&str, &str)> {
    cookie.split(';').filter_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        Some((name.trim(), value.trim()))
    })
}

pub fn find_cookie(cookie: &str, name: &str) -> Option<String> {
    cookie_pairs(cookie)
        .find(|(n, v)| n.eq_ignore_ascii_case(name) && !v.is_empty())
        .map(|(_, v)| v.to_string())
}

fn session_cookie(cookie: &str) -> String {
    let mut sess = None;
    let mut auth_id = None;
    let mut user_id = None;
    for (name, value) in cookie_pairs(cookie) {
        if value.is_empty() {
            continue;
        }
        match name.to_ascii_lowercase().as_str() {
            "sess" => sess = Some(value),
            "auth_id" => auth_id = Some(value),
            "user_id" => user_id = Some(value),
            _ => {}
        }
    }
    match (sess, auth_id.or(user_id)) {
        (Some(sess), Some(auth_id)) => format!("sess={sess};auth_id={auth_id}"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

    #[test]
    fn parse_identity_string() {
        let raw = format!(
            "user_id:=4045962599 || user_agent:={UA} || x_bc:=1sgsadg || cookie:=sess=abcdefg; auth_id=4045962599;"
        );
        let identity: AuthIdentity = raw.parse().unwrap();
        assert_eq!(identity.user_id, "4045962599");
        assert_eq!(identity.user_agent, UA);
        assert_eq!(identity.x_bc, "1sgsadg");
        assert_eq!(identity.cookie, "sess=abcdefg;auth_id=4045962599");
    }

    #[test]
    fn derives_missing_fields_from_cookie() {
        let raw = format!("user_agent:={UA} || cookie:=sess=s1; auth_id=77; fp=fingerprint");
        let identity: AuthIdentity = raw.parse().unwrap();
        assert_eq!(identity.user_id, "77");
        assert_eq!(identity.x_bc, "fingerprint");
        assert_eq!(identity.cookie, "sess=s1;auth_id=77");
    }

    #[test]
    fn user_id_stands_in_for_auth_id() {
        let identity = AuthIdentity {
            user_id: "12".to_string(),
            user_agent: UA.to_string(),
            x_bc: "bc".to_string(),
            cookie: "sess=s2".to_string(),
        }
        .normalized();
        assert_eq!(identity.cookie, "sess=s2;auth_id=12");
    }

    #[test]
    fn blank_fields_fail_closed() {
        let raw = format!("user_agent:={UA} || x_bc:=bc || cookie:=sess=s1");
        assert!(matches!(raw.parse::<AuthIdentity>(), Err(Error::Auth(_))));

        let identity = AuthIdentity {
            user_id: "1".into(),
            user_agent: "  ".into(),
            x_bc: "bc".into(),
            cookie: "sess=a;auth_id=1".into(),
        };
        assert!(identity.validate().is_err());
    }

    #[test]
    fn display_round_trips() {
        let identity = AuthIdentity {
            user_id: "1".into(),
            user_agent: UA.into(),
            x_bc: "bc".into(),
            cookie: "sess=a;auth_id=1".into(),
        };
        let parsed: AuthIdentity = identity.to_string().parse().unwrap();
        assert_eq!(parsed, identity);
    }
}
