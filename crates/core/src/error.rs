use thiserror::Error;

use crate::catalog::CatalogError;
use crate::schedule::ScheduleError;
use crate::settings::SettingsError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
}
