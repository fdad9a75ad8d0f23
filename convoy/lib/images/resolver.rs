use sqlx::{Pool, Sqlite};

use crate::{
    engine::{ContainerEngine, EngineImage},
    store, ConvoyError, ConvoyResult,
};

use super::ImageName;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The outcome of looking an image up on the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The engine has the image.
    Found(EngineImage),

    /// None of the lookup strategies found the image.
    NotFound,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Looks for an image on the engine.
///
/// Tries, in order, an inspection by the literal name, a listing filtered by the engine
/// reference, and an inspection of the engine id stored for a row with the same name or digest.
/// The first success wins. If every strategy fails, a not-found failure of the last one becomes
/// [`Resolution::NotFound`] and any other failure is returned.
pub async fn resolve(
    engine: &dyn ContainerEngine,
    pool: &Pool<Sqlite>,
    name: &str,
) -> ConvoyResult<Resolution> {
    if name.trim().is_empty() {
        return Err(ConvoyError::InternalInconsistency(format!(
            "image name to inspect is invalid, got: {name:?}"
        )));
    }

    let result = match inspect_by_uri(engine, name).await {
        Ok(image) => Ok(image),
        Err(e) => {
            tracing::trace!("inspect by uri failed for {name}: {e}");
            match inspect_by_reference(engine, name).await {
                Ok(image) => Ok(image),
                Err(e) => {
                    tracing::trace!("inspect by reference failed for {name}: {e}");
                    inspect_by_digest(engine, pool, name).await
                }
            }
        }
    };

    match result {
        Ok(image) => Ok(Resolution::Found(image)),
        Err(e) if e.is_not_found() => Ok(Resolution::NotFound),
        Err(e) => Err(e),
    }
}

/// Inspects the image by its full name. Only finds plain pulls and `repo:tag` images.
pub async fn inspect_by_uri(engine: &dyn ContainerEngine, name: &str) -> ConvoyResult<EngineImage> {
    engine.inspect_image(name).await
}

/// Inspects the first engine image matching the name's engine reference (see
/// [`ImageName::reference`]).
///
/// Delta pulls leave images that are only reachable this way.
pub async fn inspect_by_reference(
    engine: &dyn ContainerEngine,
    name: &str,
) -> ConvoyResult<EngineImage> {
    let reference = name.parse::<ImageName>()?.reference();
    let images = engine.list_images(Some(&reference)).await?;

    match images.first() {
        Some(image) => engine.inspect_image(&image.id).await,
        None => Err(ConvoyError::status(
            404,
            format!("Failed to find an image matching {name}"),
        )),
    }
}

/// Inspects the engine id recorded for a stored image with the same digest or full name.
pub async fn inspect_by_digest(
    engine: &dyn ContainerEngine,
    pool: &Pool<Sqlite>,
    name: &str,
) -> ConvoyResult<EngineImage> {
    let digest = name.split_once('@').map(|(_, digest)| digest);
    let docker_image_id = store::find_images_by_name_or_digest(pool, name, digest)
        .await?
        .into_iter()
        .find_map(|image| image.docker_image_id);

    // All matching rows are expected to point at the same engine image.
    match docker_image_id {
        Some(id) => engine.inspect_image(&id).await,
        None => Err(ConvoyError::status(
            404,
            format!("Failed to find an image matching {name}"),
        )),
    }
}
