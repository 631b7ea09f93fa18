//! Source-level operations over a selected dataset set.

use tracing::{info, instrument};

use tractscore_shared::Result;
use tractscore_sources::DataSource;

use crate::registry::DatasetRegistry;
use crate::unit::{Stage, run_stage};

/// Sources of every selected dataset, tagged with the dataset name.
pub fn data_sources(
    registry: &DatasetRegistry,
    selector: Option<&str>,
) -> Result<Vec<(String, DataSource)>> {
    let mut sources = Vec::new();
    for descriptor in registry.resolve(selector)? {
        let unit = descriptor.create();
        sources.extend(
            unit.data_sources()
                .into_iter()
                .map(|s| (descriptor.name.clone(), s)),
        );
    }
    Ok(sources)
}

/// Run only the extract stage of every selected dataset, one at a time.
#[instrument(skip(registry))]
pub async fn extract_data_sources(
    registry: &DatasetRegistry,
    selector: Option<&str>,
    use_cache: bool,
) -> Result<()> {
    for descriptor in registry.resolve(selector)? {
        let name = descriptor.name.clone();
        tokio::task::spawn_blocking(move || {
            let mut unit = run_stage(&descriptor.name, Stage::Construct, || Ok(descriptor.create()))?;
            run_stage(&descriptor.name, Stage::Extract, || unit.extract(use_cache))
        })
        .await
        .map_err(|e| {
            tractscore_shared::TractScoreError::validation(format!("extract task failed: {e}"))
        })??;
        info!(dataset = %name, "sources extracted");
    }
    Ok(())
}

/// Remove the downloaded sources of every selected dataset.
#[instrument(skip(registry))]
pub fn clear_data_source_cache(registry: &DatasetRegistry, selector: Option<&str>) -> Result<()> {
    for descriptor in registry.resolve(selector)? {
        descriptor.create().clear_data_source_cache()?;
        info!(dataset = %descriptor.name, "source cache cleared");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::SourceMirrorUnit;
    use crate::unit::PipelineUnit;
    use std::path::PathBuf;
    use tractscore_shared::TractScoreError;
    use url::Url;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ts-runner-{}", uuid::Uuid::now_v7()))
    }

    fn registry(base: &str, dir: &PathBuf) -> DatasetRegistry {
        let mut registry = DatasetRegistry::new();
        let states = DataSource::file(
            Url::parse(&format!("{base}/fips_states_2010.csv")).unwrap(),
            dir.join("census/csv/fips_states_2010.csv"),
        );
        let centroids = DataSource::file(
            Url::parse(&format!("{base}/tract_centroids.csv")).unwrap(),
            dir.join("census/csv/tract_centroids.csv"),
        );
        registry
            .register("census", false, move || {
                Box::new(SourceMirrorUnit::new(vec![states.clone()])) as Box<dyn PipelineUnit>
            })
            .unwrap();
        registry
            .register_standalone("geometry", false, move || {
                Box::new(SourceMirrorUnit::new(vec![centroids.clone()])) as Box<dyn PipelineUnit>
            })
            .unwrap();
        registry
    }

    #[test]
    fn lists_sources_of_selected_datasets() {
        let dir = temp_dir();
        let registry = registry("http://127.0.0.1:9", &dir);

        let all = data_sources(&registry, None).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "census");

        let one = data_sources(&registry, Some("geometry")).unwrap();
        assert_eq!(one[0].1.destination(), dir.join("census/csv/tract_centroids.csv"));

        let err = data_sources(&registry, Some("missing")).unwrap_err();
        assert!(matches!(err, TractScoreError::UnknownDataset { .. }));
    }

    #[tokio::test]
    async fn extract_then_clear() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::path("/fips_states_2010.csv"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("fips,state_name,state_abbreviation\n01,Alabama,AL\n"),
            )
            .mount(&server)
            .await;

        let dir = temp_dir();
        let registry = registry(&server.uri(), &dir);
        let target = dir.join("census/csv/fips_states_2010.csv");

        extract_data_sources(&registry, None, false).await.unwrap();
        assert!(target.exists());

        clear_data_source_cache(&registry, Some("census")).unwrap();
        assert!(!target.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
