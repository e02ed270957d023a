use super::types::*;
use super::xml::{Element, QWrite};

impl QWrite for Href {
    fn qwrite(&self) -> Element {
        Element::dav("href").with_text(self.0.as_str())
    }
}

impl QWrite for Depth {
    fn qwrite(&self) -> Element {
        Element::dav("depth").with_text(self.as_str())
    }
}

impl QWrite for Timeout {
    fn qwrite(&self) -> Element {
        Element::dav("timeout").with_text(self.to_string())
    }
}

impl QWrite for LockScope {
    fn qwrite(&self) -> Element {
        Element::dav("lockscope").with_child(Element::dav(self.as_str()))
    }
}

impl QWrite for LockType {
    fn qwrite(&self) -> Element {
        match self {
            LockType::Write => Element::dav("locktype").with_child(Element::dav("write")),
        }
    }
}

impl QWrite for ActiveLock {
    fn qwrite(&self) -> Element {
        let mut elem = Element::dav("activelock")
            .with_child(self.lockscope.qwrite())
            .with_child(self.locktype.qwrite())
            .with_child(self.depth.qwrite());
        if let Some(owner) = &self.owner {
            elem.push(owner.clone());
        }
        if let Some(timeout) = &self.timeout {
            elem.push(timeout.qwrite());
        }
        if let Some(token) = &self.locktoken {
            elem.push(Element::dav("locktoken").with_child(token.qwrite()));
        }
        elem.with_child(Element::dav("lockroot").with_child(self.lockroot.qwrite()))
    }
}

impl QWrite for Violation {
    fn qwrite(&self) -> Element {
        let hrefs = |name: &str, list: &[Href]| {
            list.iter()
                .fold(Element::dav(name), |acc, h| acc.with_child(h.qwrite()))
        };
        let code = match self {
            Violation::LockTokenMatchesRequestUri => Element::dav("lock-token-matches-request-uri"),
            Violation::LockTokenSubmitted(list) => hrefs("lock-token-submitted", list),
            Violation::NoConflictingLock(list) => hrefs("no-conflicting-lock", list),
            Violation::NoExternalEntities => Element::dav("no-external-entities"),
            Violation::PreservedLiveProperties => Element::dav("preserved-live-properties"),
            Violation::PropfindFiniteDepth => Element::dav("propfind-finite-depth"),
            Violation::CannotModifyProtectedProperty => {
                Element::dav("cannot-modify-protected-property")
            }
        };
        Element::dav("error").with_child(code)
    }
}

/// Value of the DAV:lockdiscovery property
pub fn lockdiscovery(locks: &[ActiveLock]) -> Element {
    locks
        .iter()
        .fold(Element::dav("lockdiscovery"), |acc, l| acc.with_child(l.qwrite()))
}

/// Value of the DAV:supportedlock property: exclusive and shared write locks
pub fn supportedlock() -> Element {
    [LockScope::Exclusive, LockScope::Shared]
        .iter()
        .fold(Element::dav("supportedlock"), |acc, scope| {
            acc.with_child(
                Element::dav("lockentry")
                    .with_child(scope.qwrite())
                    .with_child(LockType::Write.qwrite()),
            )
        })
}

/// Wrap a lock discovery in a prop element, the body of LOCK responses
pub fn lock_response(locks: &[ActiveLock]) -> Element {
    Element::dav("prop").with_child(lockdiscovery(locks))
}
