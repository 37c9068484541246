use crate::csap::handshake::{OpenRequest, WireFormat};
use crate::error::{Error, Result};
use crate::repo::ConfigRepository;

/// Where and how a client opens a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    pub service: String,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub format: WireFormat,
}

impl ServiceTarget {
    pub fn new(service: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service: service.into(),
            host: host.into(),
            port,
            user: None,
            password: None,
            format: WireFormat::Json,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Wire format of the open request. Fixed requests carry only the
    /// service name, so a fixed target cannot log in.
    #[must_use]
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Read `SERVICE`, `HOST`, `PORT` and the optional `U` / `P` from a
    /// repository section.
    ///
    /// # Errors
    ///
    /// `Error::Config` if a required key is missing or `PORT` is not a port.
    pub fn from_repository(repo: &dyn ConfigRepository, section: &str) -> Result<Self> {
        let service = repo.lookup_str(section, "SERVICE")?;
        let host = repo.lookup_str(section, "HOST")?;
        let port = repo.lookup_str(section, "PORT")?;
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::Config(format!("{section}/PORT: invalid port {port:?}")))?;

        let mut target = Self::new(service, host, port);
        target.user = repo.lookup_optional(section, "U");
        target.password = repo.lookup_optional(section, "P");
        Ok(target)
    }

    /// Open request for this target.
    ///
    /// # Errors
    ///
    /// `Error::Config` if the target uses the fixed format and has
    /// credentials it cannot send.
    pub fn request(&self) -> Result<OpenRequest> {
        if self.format == WireFormat::Fixed && (self.user.is_some() || self.password.is_some()) {
            return Err(Error::Config(format!(
                "service {}: fixed open requests cannot carry credentials",
                self.service
            )));
        }
        let request = OpenRequest::new(self.service.clone());
        Ok(match (&self.user, &self.password) {
            (Some(u), Some(p)) => request.with_credentials(u.clone(), p.clone()),
            (Some(u), None) => OpenRequest {
                user: Some(u.clone()),
                ..request
            },
            _ => request,
        })
    }
}
