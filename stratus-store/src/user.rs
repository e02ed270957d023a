/// Identity of the principal behind a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub username: String,
}

impl User {
    pub const ANONYMOUS: &'static str = "nobody";

    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(Self::ANONYMOUS)
    }

    pub fn is_anonymous(&self) -> bool {
        self.username == Self::ANONYMOUS
    }
}
