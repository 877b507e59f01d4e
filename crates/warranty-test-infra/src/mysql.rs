use crate::Result;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const MYSQL_PORT: u16 = 3306;

/// Credentials and image of the throwaway warranty database.
#[derive(Debug, Clone, TypedBuilder)]
pub struct MySqlSettings {
    #[builder(default = "warranty".to_string())]
    pub database: String,
    #[builder(default = "warranty".to_string())]
    pub username: String,
    #[builder(default = "warranty".to_string())]
    pub password: String,
    #[builder(default = "8.4".to_string())]
    pub image_tag: String,
}

impl Default for MySqlSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Disposable MySQL server for the storage integration tests. The container
/// is removed when this value is dropped.
pub struct MySqlServer {
    container: ContainerAsync<GenericImage>,
    settings: MySqlSettings,
}

impl MySqlServer {
    pub async fn start(settings: MySqlSettings) -> Result<Self> {
        // The init phase runs a temporary server on port 0 that also reports
        // "ready for connections"; only the final server listens on 3306.
        let container = GenericImage::new("mysql", &settings.image_tag)
            .with_exposed_port(MYSQL_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr("port: 3306"))
            .with_env_var("MYSQL_DATABASE", &settings.database)
            .with_env_var("MYSQL_USER", &settings.username)
            .with_env_var("MYSQL_PASSWORD", &settings.password)
            .with_env_var("MYSQL_ROOT_PASSWORD", "root")
            .with_env_var("TZ", "UTC")
            .start()
            .await?;

        Ok(Self { container, settings })
    }

    /// Connection string for sqlx, pointing at the mapped host port.
    pub async fn dsn(&self) -> Result<String> {
        let host = self.container.get_host().await?;
        let port = self.container.get_host_port_ipv4(MYSQL_PORT).await?;
        let MySqlSettings {
            database,
            username,
            password,
            ..
        } = &self.settings;
        Ok(format!("mysql://{username}:{password}@{host}:{port}/{database}"))
    }
}
