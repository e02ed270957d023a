use super::xml::{Element, Node};

/// 14.1.  activelock XML Element
///
/// Name:   activelock
///
/// Purpose:   Describes a lock on a resource.
/// <!ELEMENT activelock (lockscope, locktype, depth, owner?, timeout?,
///           locktoken?, lockroot)>
#[derive(Debug, PartialEq, Clone)]
pub struct ActiveLock {
    pub lockscope: LockScope,
    pub locktype: LockType,
    pub depth: Depth,
    pub owner: Option<Element>,
    pub timeout: Option<Timeout>,
    pub locktoken: Option<Href>,
    pub lockroot: Href,
}

/// 14.4 depth XML Element
///
/// Value:   "0" | "1" | "infinity"
///
/// <!ELEMENT depth (#PCDATA) >
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}
impl Depth {
    /// Parse the value of a Depth header or of a depth element
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "0" => Some(Self::Zero),
            "1" => Some(Self::One),
            "infinity" => Some(Self::Infinity),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::One => "1",
            Self::Infinity => "infinity",
        }
    }
}

/// 14.5 error XML Element
///
/// Error responses, particularly 403 Forbidden and 409 Conflict, sometimes
/// need more information to indicate what went wrong. Any element that is
/// a child of the 'error' element is considered to be a precondition or
/// postcondition code.
///
/// <!ELEMENT error ANY >
#[derive(Debug, PartialEq, Clone)]
pub enum Violation {
    /// Use with:  409 Conflict
    ///
    /// A request may include a Lock-Token header to identify a lock for the
    /// UNLOCK method. If the Request-URI does not fall within the scope of
    /// the lock identified by the token, the server SHOULD use this error.
    LockTokenMatchesRequestUri,

    /// Use with:  423 Locked
    ///
    /// <!ELEMENT lock-token-submitted (href+) >
    LockTokenSubmitted(Vec<Href>),

    /// Use with:  Typically 423 Locked
    ///
    /// <!ELEMENT no-conflicting-lock (href)* >
    NoConflictingLock(Vec<Href>),

    /// Use with:  403 Forbidden
    NoExternalEntities,

    /// Use with:  409 Conflict
    PreservedLiveProperties,

    /// Use with:  403 Forbidden
    PropfindFiniteDepth,

    /// Use with:  403 Forbidden
    CannotModifyProtectedProperty,
}

/// 14.7.  href XML Element
///
/// MUST contain a URI or a relative reference.
///
/// <!ELEMENT href (#PCDATA)>
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Href(pub String);

/// 14.11.  lockinfo XML Element
///
/// Purpose:   The 'lockinfo' XML element is used with a LOCK method to
/// specify the type of lock the client wishes to have created.
///
/// <!ELEMENT lockinfo (lockscope, locktype, owner?)  >
#[derive(Debug, PartialEq, Clone)]
pub struct LockInfo {
    pub lockscope: LockScope,
    pub locktype: LockType,
    /// The owner element is kept as sent by the client, it is returned
    /// verbatim in lock discovery.
    pub owner: Option<Element>,
}

/// 14.13.  lockscope XML Element
///
/// <!ELEMENT lockscope (exclusive | shared) >
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LockScope {
    Exclusive,
    Shared,
}
impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Shared => "shared",
        }
    }
}

/// 14.15.  locktype XML Element
///
/// At present, RFC 4918 only defines one lock type, the write
/// lock.
///
/// <!ELEMENT locktype (write) >
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LockType {
    Write,
}

/// 14.20.  propfind XML Element
///
/// Purpose:   Specifies the properties to be returned from a PROPFIND
/// method.  Four special elements are specified for use with
/// 'propfind': 'prop', 'allprop', 'include', and 'propname'.
///
/// <!ELEMENT propfind ( propname | (allprop, include?) | prop ) >
///
/// Property names are canonical names, see [`super::xml::canonical`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PropFind {
    PropName,
    AllProp(Vec<String>),
    Prop(Vec<String>),
}

/// 14.19.  propertyupdate XML Element
///
/// Purpose:   To contain a request to alter the properties on a
/// resource.
///
/// <!ELEMENT propertyupdate (remove | set)+ >
///
/// Instructions are kept in document order.
#[derive(Debug, PartialEq, Clone)]
pub struct PropertyUpdate(pub Vec<Instruction>);

#[derive(Debug, PartialEq, Clone)]
pub enum Instruction {
    Set(String, PropValue),
    Remove(String),
}
impl Instruction {
    pub fn name(&self) -> &str {
        match self {
            Self::Set(n, _) => n,
            Self::Remove(n) => n,
        }
    }
}

/// Value of a property: plain text, or a list of nodes when the
/// value holds markup.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PropValue {
    Text(String),
    Xml(Vec<Node>),
}
impl PropValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Take the content of a property element
    pub fn of(elem: &Element) -> Self {
        match elem.has_elements() {
            true => Self::Xml(elem.children.clone()),
            false => Self::Text(elem.text()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Xml(_) => None,
        }
    }

    /// Wrap the value in an element named after the property
    pub fn to_element(&self, name: &str) -> Element {
        let mut elem = Element::new(name);
        match self {
            Self::Text(t) if t.is_empty() => (),
            Self::Text(t) => elem.children.push(Node::Text(t.clone())),
            Self::Xml(nodes) => elem.children.extend(nodes.iter().cloned()),
        }
        elem
    }
}

/// 10.7 Timeout Request Header
///
/// TimeOut = "Timeout" ":" 1#TimeType
/// TimeType = ("Second-" DAVTimeOutVal | "Infinite")
///             ; No LWS allowed within TimeType
/// DAVTimeOutVal = 1*DIGIT
///
/// The timeout value for TimeType "Second" MUST NOT be greater than
/// 2^32-1.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Timeout {
    Seconds(u32),
    Infinite,
}
impl Timeout {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("infinite") {
            return Some(Self::Infinite);
        }
        let (kind, secs) = value.split_once('-')?;
        match kind.eq_ignore_ascii_case("second") {
            true => secs.parse::<u32>().ok().map(Self::Seconds),
            false => None,
        }
    }

    /// Parse a comma separated Timeout header, unknown entries are skipped
    pub fn parse_list(header: &str) -> Vec<Self> {
        header.split(',').filter_map(Self::parse).collect()
    }
}
impl std::fmt::Display for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seconds(s) => write!(f, "Second-{}", s),
            Self::Infinite => write!(f, "Infinite"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_header() {
        assert_eq!(
            Timeout::parse_list("Infinite, Second-4100000000"),
            vec![Timeout::Infinite, Timeout::Seconds(4100000000)]
        );
        assert_eq!(Timeout::parse("Second-9999999999"), None);
        assert_eq!(
            Timeout::parse_list("Second-3600, Infinite"),
            vec![Timeout::Seconds(3600), Timeout::Infinite]
        );
        assert_eq!(Timeout::parse("second-12"), Some(Timeout::Seconds(12)));
        assert_eq!(Timeout::parse("Minute-3"), None);
        assert_eq!(Timeout::Seconds(600).to_string(), "Second-600");
    }

    #[test]
    fn depth_values() {
        assert_eq!(Depth::parse("Infinity"), Some(Depth::Infinity));
        assert_eq!(Depth::parse(" 1"), Some(Depth::One));
        assert_eq!(Depth::parse("2"), None);
    }
}
