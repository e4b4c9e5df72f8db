pub mod device;
pub mod entry;
pub mod server;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Device(device::Args),
    Entry(entry::Args),
}

impl Action {
    /// Execute the action.
    ///
    /// # Errors
    ///
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
            Self::Device(args) => device::execute(args).await,
            Self::Entry(args) => entry::execute(args).await,
        }
    }
}
