use sqlx::{sqlite::SqliteRow, Pool, QueryBuilder, Row, Sqlite};

use crate::{images::Image, ConvoyResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const IMAGE_COLUMNS: &str = "id, name, app_id, app_uuid, service_id, service_name, image_id, \
                             release_id, commit_hash, dependent, docker_image_id";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns every stored image.
pub async fn select_images(pool: &Pool<Sqlite>) -> ConvoyResult<Vec<Image>> {
    let rows = sqlx::query(&format!("SELECT {IMAGE_COLUMNS} FROM image ORDER BY id"))
        .fetch_all(pool)
        .await?;

    rows.iter().map(image_from_row).collect()
}

/// Returns the stored images matching the identifying fields of `image`.
///
/// `name`, `app_id` and `dependent` always take part in the match; the optional backend ids
/// only when they are set on `image`.
pub async fn select_matching_images(pool: &Pool<Sqlite>, image: &Image) -> ConvoyResult<Vec<Image>> {
    let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT {IMAGE_COLUMNS} FROM image WHERE name = "));
    query.push_bind(&image.name);
    query.push(" AND app_id = ").push_bind(image.app_id);
    query.push(" AND dependent = ").push_bind(image.dependent);

    if let Some(service_id) = image.service_id {
        query.push(" AND service_id = ").push_bind(service_id);
    }
    if let Some(service_name) = &image.service_name {
        query.push(" AND service_name = ").push_bind(service_name);
    }
    if let Some(image_id) = image.image_id {
        query.push(" AND image_id = ").push_bind(image_id);
    }
    if let Some(release_id) = image.release_id {
        query.push(" AND release_id = ").push_bind(release_id);
    }
    if let Some(docker_image_id) = &image.docker_image_id {
        query.push(" AND docker_image_id = ").push_bind(docker_image_id);
    }
    query.push(" ORDER BY id");

    let rows = query.build().fetch_all(pool).await?;
    rows.iter().map(image_from_row).collect()
}

/// Returns the first stored image with the given engine id.
pub async fn find_image_by_docker_id(
    pool: &Pool<Sqlite>,
    docker_image_id: &str,
) -> ConvoyResult<Option<Image>> {
    let row = sqlx::query(&format!(
        "SELECT {IMAGE_COLUMNS} FROM image WHERE docker_image_id = ? ORDER BY id LIMIT 1"
    ))
    .bind(docker_image_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(image_from_row).transpose()
}

/// Returns stored images named exactly `name` or whose name ends with `@digest`.
pub async fn find_images_by_name_or_digest(
    pool: &Pool<Sqlite>,
    name: &str,
    digest: Option<&str>,
) -> ConvoyResult<Vec<Image>> {
    let suffix = digest.map(|d| format!("@{d}"));
    let rows = sqlx::query(&format!(
        r#"
        SELECT {IMAGE_COLUMNS} FROM image
        WHERE name = ?
           OR (? IS NOT NULL AND substr(name, -length(?)) = ?)
        ORDER BY id
        "#
    ))
    .bind(name)
    .bind(&suffix)
    .bind(&suffix)
    .bind(&suffix)
    .fetch_all(pool)
    .await?;

    rows.iter().map(image_from_row).collect()
}

/// Returns the engine ids of every stored image that has one.
pub async fn select_docker_image_ids(pool: &Pool<Sqlite>) -> ConvoyResult<Vec<String>> {
    let rows = sqlx::query("SELECT docker_image_id FROM image WHERE docker_image_id IS NOT NULL")
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| Ok(row.try_get::<String, _>("docker_image_id")?))
        .collect()
}

/// Stores an image keyed by its identity.
///
/// If a row with the same name, app, service, backend image id, release and dependent flag
/// exists, its engine id is updated; otherwise a new row is inserted.
pub async fn upsert_image(pool: &Pool<Sqlite>, image: &Image) -> ConvoyResult<()> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE image SET docker_image_id = ?
        WHERE name = ?
          AND app_id = ?
          AND service_id IS ?
          AND service_name IS ?
          AND image_id IS ?
          AND release_id IS ?
          AND dependent = ?
        "#,
    )
    .bind(&image.docker_image_id)
    .bind(&image.name)
    .bind(image.app_id)
    .bind(image.service_id)
    .bind(&image.service_name)
    .bind(image.image_id)
    .bind(image.release_id)
    .bind(image.dependent)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if updated == 0 {
        sqlx::query(
            r#"
            INSERT INTO image (
                name, app_id, app_uuid, service_id, service_name,
                image_id, release_id, commit_hash, dependent, docker_image_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&image.name)
        .bind(image.app_id)
        .bind(&image.app_uuid)
        .bind(image.service_id)
        .bind(&image.service_name)
        .bind(image.image_id)
        .bind(image.release_id)
        .bind(&image.commit)
        .bind(image.dependent)
        .bind(&image.docker_image_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Overwrites the stored fields of every row named `image.name`.
pub async fn update_image_by_name(pool: &Pool<Sqlite>, image: &Image) -> ConvoyResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE image SET
            app_id = ?, app_uuid = ?, service_id = ?, service_name = ?,
            image_id = ?, release_id = ?, commit_hash = ?, dependent = ?,
            docker_image_id = ?
        WHERE name = ?
        "#,
    )
    .bind(image.app_id)
    .bind(&image.app_uuid)
    .bind(image.service_id)
    .bind(&image.service_name)
    .bind(image.image_id)
    .bind(image.release_id)
    .bind(&image.commit)
    .bind(image.dependent)
    .bind(&image.docker_image_id)
    .bind(&image.name)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Sets the engine id of a stored row.
pub async fn set_docker_image_id(
    pool: &Pool<Sqlite>,
    id: i64,
    docker_image_id: &str,
) -> ConvoyResult<()> {
    sqlx::query("UPDATE image SET docker_image_id = ? WHERE id = ?")
        .bind(docker_image_id)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Deletes the stored rows with the given ids.
pub async fn delete_images(pool: &Pool<Sqlite>, ids: &[i64]) -> ConvoyResult<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM image WHERE id IN (");
    let mut separated = query.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    query.build().execute(pool).await?;
    Ok(())
}

fn image_from_row(row: &SqliteRow) -> ConvoyResult<Image> {
    Ok(Image {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        app_id: row.try_get("app_id")?,
        app_uuid: row.try_get("app_uuid")?,
        service_id: row.try_get("service_id")?,
        service_name: row.try_get("service_name")?,
        image_id: row.try_get("image_id")?,
        release_id: row.try_get("release_id")?,
        commit: row.try_get("commit_hash")?,
        dependent: row.try_get("dependent")?,
        docker_image_id: row.try_get("docker_image_id")?,
        status: None,
        download_progress: None,
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
