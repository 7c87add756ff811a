//! Store implementations backed by PostgreSQL

pub mod booking_repo;
pub mod idempotency_repo;
pub mod reservation_repo;
pub mod saga_repo;
pub mod wallet_repo;

pub use booking_repo::PgBookingRepository;
pub use idempotency_repo::PgIdempotencyRepository;
pub use reservation_repo::PgReservationRepository;
pub use saga_repo::PgSagaRepository;
pub use wallet_repo::PgWalletRepository;
