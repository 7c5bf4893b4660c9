mod execution_repository;

pub use execution_repository::ExecutionRepository;
