pub mod ip_reputation;

pub use ip_reputation::SqliteIpReputationRepository;
