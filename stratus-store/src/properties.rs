use async_trait::async_trait;

use stratus_dav::types::{Instruction, PropValue};

use crate::error::{DavError, Result};
use crate::user::User;

/// Outcome of a refused batch: one error per instruction, by property name
pub type BatchErrors = Vec<(String, DavError)>;

/// Properties of one resource, names are canonical XML names.
///
/// The `_by_user` variants default to their plain counterpart; backends
/// with per-user visibility override them.
#[async_trait]
pub trait Properties: Send + Sync {
    async fn get(&self, name: &str) -> Result<PropValue>;
    async fn set(&self, name: &str, value: PropValue) -> Result<()>;
    async fn remove(&self, name: &str) -> Result<()>;

    /// Apply every instruction in order, or none of them
    async fn run_instructions(&self, instructions: &[Instruction]) -> Result<Option<BatchErrors>>;

    /// Properties returned by an allprop request
    async fn get_all(&self) -> Result<Vec<(String, PropValue)>>;
    /// Every property name, live and dead
    async fn list(&self) -> Result<Vec<String>>;
    async fn list_live(&self) -> Result<Vec<String>>;
    async fn list_dead(&self) -> Result<Vec<String>>;

    async fn get_by_user(&self, name: &str, _user: &User) -> Result<PropValue> {
        self.get(name).await
    }
    async fn set_by_user(&self, name: &str, value: PropValue, _user: &User) -> Result<()> {
        self.set(name, value).await
    }
    async fn remove_by_user(&self, name: &str, _user: &User) -> Result<()> {
        self.remove(name).await
    }
    async fn run_instructions_by_user(
        &self,
        instructions: &[Instruction],
        _user: &User,
    ) -> Result<Option<BatchErrors>> {
        self.run_instructions(instructions).await
    }
    async fn get_all_by_user(&self, _user: &User) -> Result<Vec<(String, PropValue)>> {
        self.get_all().await
    }
    async fn list_by_user(&self, _user: &User) -> Result<Vec<String>> {
        self.list().await
    }
}
