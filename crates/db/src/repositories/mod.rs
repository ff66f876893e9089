pub mod observation_repo;
pub mod prediction_repo;

pub use observation_repo::ObservationRepo;
pub use prediction_repo::PredictionRepo;
