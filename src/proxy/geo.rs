//! Country lookup for IP-literal hosts using an MMDB database

use crate::Result;
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// MMDB-backed country resolver, cheap to clone
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    /// Open a GeoLite2/GeoIP2 database file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = Reader::open_readfile(path)?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// ISO 3166-1 alpha-2 code for a host, when the host is an IP literal
    /// present in the database
    pub fn country_code(&self, host: &str) -> Option<String> {
        let ip: IpAddr = host.trim_matches(['[', ']']).parse().ok()?;
        match self.lookup_ip(ip) {
            Ok(code) => code,
            Err(e) => {
                tracing::debug!("mmdb lookup failed for {}: {}", ip, e);
                None
            }
        }
    }

    fn lookup_ip(&self, ip: IpAddr) -> Result<Option<String>> {
        let lookup_result = self.reader.lookup(ip)?;
        let city: Option<geoip2::City> = lookup_result.decode()?;
        Ok(city
            .and_then(|city| city.country.iso_code.map(String::from))
            .map(|code| code.to_ascii_uppercase()))
    }
}

impl Clone for GeoLocator {
    fn clone(&self) -> Self {
        Self {
            reader: Arc::clone(&self.reader),
        }
    }
}
