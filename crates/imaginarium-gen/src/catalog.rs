//! Catalog state: generator/style lists and the current field set
//!
//! Catalogs are replaced wholesale on refresh. Changing the selected
//! generator rebuilds the field set from its schema; re-selecting the
//! current one leaves user edits alone.

use imaginarium_core::Result;

use crate::api::CatalogService;
use crate::field::{
    build_generator_fields, build_skybox_style_fields, Generator, GeneratorField, SkyboxStyle,
};

#[derive(Default)]
pub struct CatalogState {
    pub generators: Vec<Generator>,
    pub styles: Vec<SkyboxStyle>,
    /// Display labels, index-aligned with `generators` / `styles`
    pub generator_options: Vec<String>,
    pub style_options: Vec<String>,
    /// Field set of the currently selected generator
    pub fields: Vec<GeneratorField>,
    /// Field set of the plain skybox form
    pub skybox_fields: Vec<GeneratorField>,
    generator_index: usize,
    last_built_index: usize,
    style_index: usize,
}

impl CatalogState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch both catalogs and rebuild everything derived from them.
    ///
    /// The previous catalogs are discarded entirely and the selection
    /// resets to the first entry.
    pub async fn refresh(&mut self, catalog: &dyn CatalogService, api_key: &str) -> Result<()> {
        self.styles = catalog.get_skybox_styles(api_key).await?;
        self.generators = catalog.get_generators(api_key).await?;

        self.generator_options = self.generators.iter().map(|g| g.name.clone()).collect();
        self.style_options = self.styles.iter().map(|s| s.name.clone()).collect();

        self.generator_index = 0;
        self.last_built_index = 0;
        self.style_index = 0;
        self.skybox_fields = build_skybox_style_fields();
        self.rebuild_fields();

        tracing::debug!(
            generators = self.generators.len(),
            styles = self.styles.len(),
            "Catalog refreshed"
        );
        Ok(())
    }

    /// Switch the selected generator, rebuilding fields only on change
    pub fn select_generator(&mut self, index: usize) {
        if index >= self.generators.len() {
            return;
        }
        self.generator_index = index;
        if index != self.last_built_index {
            self.rebuild_fields();
            self.last_built_index = index;
        }
    }

    pub fn select_style(&mut self, index: usize) {
        if index < self.styles.len() {
            self.style_index = index;
        }
    }

    pub fn selected_generator(&self) -> Option<&Generator> {
        self.generators.get(self.generator_index)
    }

    pub fn selected_style(&self) -> Option<&SkyboxStyle> {
        self.styles.get(self.style_index)
    }

    fn rebuild_fields(&mut self) {
        self.fields = match self.generators.get(self.generator_index) {
            Some(generator) => build_generator_fields(generator, &self.styles),
            None => Vec::new(),
        };
    }
}
