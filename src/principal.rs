use crate::constants::PrincipalNameType;
use crate::error::KrbError;
use std::fmt;
use std::str::FromStr;
use tracing::error;

const REALM_SEP: char = '@';
const COMPONENT_SEP: char = '/';
const KRB5_TGS_NAME: &str = "krbtgt";

/// A principal identity. Two names are the same principal when the realm and every
/// component are equal, the name type is not part of the identity.
#[derive(Debug, Clone, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct Name {
    realm: String,
    components: Vec<String>,
}

impl Name {
    pub fn new<S: Into<String>>(realm: S, components: Vec<String>) -> Result<Self, KrbError> {
        let realm = realm.into();
        if realm.is_empty() || components.is_empty() || components.iter().any(|c| c.is_empty()) {
            error!(%realm, ?components, "principal requires a realm and non-empty components");
            return Err(KrbError::PrincipalNameInvalid);
        }
        Ok(Name { realm, components })
    }

    pub fn service_krbtgt(realm: &str) -> Self {
        // RFC4120 7.3 - krbtgt/REALM@REALM
        Name {
            realm: realm.to_string(),
            components: vec![KRB5_TGS_NAME.to_string(), realm.to_string()],
        }
    }

    pub fn realm(&self) -> &str {
        &self.realm
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The name type to record for this principal when the source does not say.
    pub fn name_type(&self) -> PrincipalNameType {
        if self.components.len() == 2 && self.components[0] == KRB5_TGS_NAME {
            PrincipalNameType::NtSrvInst
        } else {
            PrincipalNameType::NtPrincipal
        }
    }
}

impl FromStr for Name {
    type Err = KrbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((components, realm)) = s.rsplit_once(REALM_SEP) else {
            error!(name = %s, "principal is missing a realm");
            return Err(KrbError::PrincipalNameInvalid);
        };
        let components = components
            .split(COMPONENT_SEP)
            .map(String::from)
            .collect();
        Name::new(realm, components)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.components.join("/"), REALM_SEP, self.realm)
    }
}

/// A principal template where each component and the realm are shell style
/// wildcards. A name matches only when it has the same number of components as
/// the pattern and every position matches.
#[derive(Debug, Clone)]
pub struct PrincipalPattern {
    realm: glob::Pattern,
    components: Vec<glob::Pattern>,
}

impl PrincipalPattern {
    pub fn new(realm: &str, components: &[&str]) -> Result<Self, KrbError> {
        let compile = |p: &str| {
            glob::Pattern::new(p).map_err(|err| {
                error!(?err, pattern = %p, "invalid principal pattern component");
                KrbError::PrincipalPatternInvalid
            })
        };

        if components.is_empty() {
            error!("principal pattern requires at least one component");
            return Err(KrbError::PrincipalPatternInvalid);
        }

        Ok(PrincipalPattern {
            realm: compile(realm)?,
            components: components
                .iter()
                .map(|c| compile(*c))
                .collect::<Result<_, _>>()?,
        })
    }

    /// `<service>/*@*` - every instance of a service in every realm. The service name
    /// is taken literally.
    pub fn service_wildcard(service: &str) -> Result<Self, KrbError> {
        let service = glob::Pattern::escape(service);
        Self::new("*", &[service.as_str(), "*"])
    }

    pub fn matches(&self, name: &Name) -> bool {
        self.components.len() == name.components.len()
            && self.realm.matches(&name.realm)
            && self
                .components
                .iter()
                .zip(name.components.iter())
                .all(|(p, c)| p.matches(c))
    }
}

impl FromStr for PrincipalPattern {
    type Err = KrbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((components, realm)) = s.rsplit_once(REALM_SEP) else {
            error!(pattern = %s, "principal pattern is missing a realm");
            return Err(KrbError::PrincipalPatternInvalid);
        };
        let components: Vec<&str> = components.split(COMPONENT_SEP).collect();
        Self::new(realm, &components)
    }
}

impl fmt::Display for PrincipalPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c: Vec<&str> = self.components.iter().map(|p| p.as_str()).collect();
        write!(f, "{}{}{}", c.join("/"), REALM_SEP, self.realm.as_str())
    }
}
