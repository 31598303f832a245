use crate::types::dataset_kind::DatasetKind;
use crate::types::window::CollectionWindow;

/// Builds request URLs for a collection window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiLayout {
    base_url: String,
}

impl ApiLayout {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, window: &CollectionWindow) -> String {
        let id = &window.entity_id;
        match window.dataset_kind {
            DatasetKind::DailyClimatology => format!(
                "{}/api/valores/climatologicos/diarios/datos/fechaini/{}T00:00:00UTC/fechafin/{}T23:59:59UTC/estacion/{}",
                self.base_url,
                window.range.start.format("%Y-%m-%d"),
                window.range.end.format("%Y-%m-%d"),
                id
            ),
            // Conventional observations only expose the trailing 24 hours;
            // the fetcher keeps the rows that fall inside the window.
            DatasetKind::Observation => format!(
                "{}/api/observacion/convencional/datos/estacion/{}",
                self.base_url, id
            ),
            DatasetKind::Forecast => format!(
                "{}/api/prediccion/especifica/municipio/diaria/{}",
                self.base_url, id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::window::DateRange;
    use chrono::NaiveDate;

    #[test]
    fn test_daily_climatology_url_carries_window() {
        let layout = ApiLayout::new("https://example.test/opendata/");
        let window = CollectionWindow::new(
            "0076",
            DatasetKind::DailyClimatology,
            DateRange::new(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 30).unwrap(),
            )
            .unwrap(),
        );
        assert_eq!(
            layout.url_for(&window),
            "https://example.test/opendata/api/valores/climatologicos/diarios/datos/fechaini/2024-01-01T00:00:00UTC/fechafin/2024-01-30T23:59:59UTC/estacion/0076"
        );
    }

    #[test]
    fn test_forecast_url_targets_municipality() {
        let layout = ApiLayout::new("https://example.test/opendata");
        let window = CollectionWindow::new(
            "08019",
            DatasetKind::Forecast,
            DateRange::single(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        );
        assert!(layout
            .url_for(&window)
            .ends_with("/api/prediccion/especifica/municipio/diaria/08019"));
    }
}
