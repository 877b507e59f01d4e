use thiserror::Error;

#[derive(Debug, Error)]
pub enum TestInfraError {
    #[error("mysql container: {0}")]
    Container(#[from] testcontainers::TestcontainersError),
}

pub type Result<T, E = TestInfraError> = std::result::Result<T, E>;
