//! POP3 authentication support (USER/PASS, APOP and SASL)

use super::Pop3Client;
use crate::apop::apop_digest;
use crate::capabilities::{AuthType, CapabilityFlags};
use crate::commands;
use crate::engine::{CommandState, EngineState};
use crate::error::{Pop3Error, Result};
use crate::sasl::{SaslMechanism, decode_sasl_data, encode_sasl_data};
use crate::stream::Transport;
use tracing::{debug, warn};

impl<T: Transport> Pop3Client<T> {
    /// Authenticate with the configured credentials
    ///
    /// Uses APOP when the greeting carried a challenge, otherwise USER/PASS.
    /// On success the session enters TRANSACTION state and capabilities are
    /// re-read, since some servers only advertise UIDL or TOP after login.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use pop3_engine::{Pop3Client, ServerConfig};
    /// # use std::sync::Arc;
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ServerConfig::tls("pop.example.com", "user", "pass");
    /// let mut client = Pop3Client::connect(Arc::new(config))?;
    /// client.authenticate()?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// - [`Pop3Error::Command`] - already authenticated
    /// - [`Pop3Error::AuthFailed`] - server rejected the credentials
    /// - [`Pop3Error::InvalidCommand`] - username or password contains a line break
    /// - [`Pop3Error::Io`] - connection failure
    pub fn authenticate(&mut self) -> Result<()> {
        self.ensure_not_authenticated()?;

        let apop = self
            .engine
            .auth_types()
            .contains(&AuthType::Apop)
            .then(|| self.engine.apop_challenge().map(str::to_string))
            .flatten();

        match apop {
            Some(challenge) => self.login_apop(&challenge)?,
            None => self.login_user_pass()?,
        }

        self.finish_login()
    }

    fn login_apop(&mut self, challenge: &str) -> Result<()> {
        debug!("Authenticating as {} with APOP", self.config.username);
        let digest = apop_digest(challenge, &self.config.password);
        let cmd = commands::apop(&self.config.username, &digest)?;

        match self.simple(cmd)? {
            (CommandState::Ok, _) => Ok(()),
            (_, response) => Err(Pop3Error::AuthFailed(
                commands::response_text(&response).to_string(),
            )),
        }
    }

    fn login_user_pass(&mut self) -> Result<()> {
        debug!("Authenticating as {} with USER/PASS", self.config.username);
        if !self.encrypted {
            warn!("Sending password in clear text to {}", self.config.host);
        }

        let cmd = commands::user(&self.config.username)?;
        if let (CommandState::Err, response) = self.simple(cmd)? {
            return Err(Pop3Error::AuthFailed(
                commands::response_text(&response).to_string(),
            ));
        }

        let cmd = commands::pass(&self.config.password)?;
        match self.simple(cmd)? {
            (CommandState::Ok, _) => Ok(()),
            (_, response) => Err(Pop3Error::AuthFailed(
                commands::response_text(&response).to_string(),
            )),
        }
    }

    /// Authenticate using a SASL mechanism (RFC 5034)
    ///
    /// Sends `AUTH` with an initial response when the mechanism has one, then
    /// answers each `+ challenge` continuation until the server replies
    /// `+OK` or `-ERR`.
    ///
    /// # Arguments
    ///
    /// * `mechanism` - A SASL mechanism implementing the [`SaslMechanism`] trait
    ///
    /// # Errors
    ///
    /// - [`Pop3Error::EncryptionRequired`] - mechanism needs TLS but the channel is clear
    /// - [`Pop3Error::AuthFailed`] - server rejected the exchange
    /// - [`Pop3Error::InvalidResponse`] - malformed base64 challenge
    pub fn authenticate_sasl(&mut self, mut mechanism: impl SaslMechanism) -> Result<()> {
        self.ensure_not_authenticated()?;

        let name = mechanism.mechanism_name().to_string();
        debug!("Authenticating with SASL mechanism: {}", name);

        if mechanism.requires_tls() && !self.encrypted {
            return Err(Pop3Error::EncryptionRequired(format!(
                "SASL {} requires an encrypted connection",
                name
            )));
        }
        if self.capabilities().has(CapabilityFlags::SASL) && !self.capabilities().has_sasl(&name) {
            warn!("Server did not advertise SASL {}, trying anyway", name);
        }

        let initial = mechanism
            .initial_response()?
            .map(|data| encode_sasl_data(&data));
        let (mut state, mut response) =
            self.simple_sensitive(commands::auth(&name, initial.as_deref())?)?;

        while state == CommandState::Ok {
            let Some(encoded) = commands::sasl_continuation(&response) else {
                break;
            };
            debug!("SASL challenge received, processing...");

            let reply = match decode_sasl_data(encoded)
                .and_then(|challenge| mechanism.process_challenge(&challenge))
            {
                Ok(data) => encode_sasl_data(&data),
                Err(e) => {
                    // Cancel the exchange so the server leaves its AUTH state
                    let (_, cancelled) = self.simple_sensitive(commands::auth_continue("*")?)?;
                    debug!("SASL exchange cancelled: {}", cancelled);
                    return Err(e);
                }
            };
            (state, response) = self.simple_sensitive(commands::auth_continue(&reply)?)?;
        }

        if state != CommandState::Ok {
            return Err(Pop3Error::AuthFailed(
                commands::response_text(&response).to_string(),
            ));
        }

        debug!("SASL authentication successful");
        self.finish_login()
    }

    fn ensure_not_authenticated(&self) -> Result<()> {
        if self.engine.state() == EngineState::Auth {
            Ok(())
        } else {
            Err(Pop3Error::Command("Already authenticated".to_string()))
        }
    }

    fn finish_login(&mut self) -> Result<()> {
        self.engine.set_state(EngineState::Transaction);
        debug!("Authentication successful");
        self.engine.reget_capabilities()
    }
}
