use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::separate_track,
        api::download_stem,
        api::health_check,
    ),
    components(
        schemas(
            api::HealthResponse,
            api::SeparateUpload,
        )
    ),
    tags(
        (name = "stem-split-server", description = "Vocal/instrumental stem separation")
    )
)]
pub struct ApiDoc;
