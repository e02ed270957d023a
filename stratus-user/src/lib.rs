pub mod config;
pub mod login;

// A user is only an identity here:
// - the configuration tells how requests are authenticated (config)
// - the authenticators turn request credentials into a User (login)
