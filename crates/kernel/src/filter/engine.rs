//! Per-call filter state machine.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::definition::{FilterContext, FilterDefinition};
use super::{FilterOptions, FilterRequest, is_base_guarded, to_camel_case, value_as_bool, value_as_u32};
use crate::config::{Config, Sigils};
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::projection::{ProjectionSpec, SpecNode};
use crate::query::{Page, PaginationMode, Query, RecordSource};

/// How the query will be paginated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlan {
    pub page: u32,
    pub per_page: u32,
    pub mode: PaginationMode,
}

/// Applies a shared [`FilterDefinition`] to individual requests.
///
/// The engine holds no per-call state; one instance serves any number of
/// concurrent calls.
#[derive(Debug, Clone)]
pub struct FilterEngine {
    definition: Arc<FilterDefinition>,
    config: Config,
}

impl FilterEngine {
    pub fn new(definition: Arc<FilterDefinition>, config: Config) -> Self {
        Self { definition, config }
    }

    pub fn definition(&self) -> &FilterDefinition {
        &self.definition
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Filter, sort and paginate records from `source`.
    ///
    /// The request's own query is used when it carries one; otherwise a
    /// fresh query is taken from the source.
    pub async fn filter(&self, source: &dyn RecordSource, mut request: FilterRequest) -> Result<Page> {
        let mut query = match request.query.take() {
            Some(query) => query,
            None => source.query(),
        };

        let plan = self.apply(query.as_mut(), &request, source.per_page())?;
        tracing::debug!(
            page = plan.page,
            per_page = plan.per_page,
            mode = ?plan.mode,
            "executing filtered query"
        );

        match plan.mode {
            PaginationMode::Full => query.paginate(plan.page, plan.per_page).await,
            PaginationMode::Simple => query.simple_paginate(plan.page, plan.per_page).await,
        }
    }

    /// Apply every query mutation for `request` and work out pagination,
    /// without running the query.
    pub fn apply(
        &self,
        query: &mut dyn Query,
        request: &FilterRequest,
        default_per_page: u32,
    ) -> Result<PagePlan> {
        let data = &request.data;
        let options = &request.options;
        let ctx = FilterContext::new(data, request.user.as_deref(), &request.extras);

        self.auto_select(query, options);

        if !options.skip_conditions
            && let Some(conditions) = self.definition.conditions()
        {
            conditions(&mut *query, &ctx).map_err(|e| Error::operation("conditions", e))?;
        }

        self.dispatch(query, data, &ctx)?;

        if data.get("sort").is_none_or(Value::is_null) {
            self.definition.sort().apply_default(query);
        }

        for (name, value) in self.definition.auto_apply() {
            if let Some(operation) = self.definition.operation(name) {
                operation(&mut *query, value, &ctx).map_err(|e| Error::operation(name, e))?;
            }
        }

        if !options.select.is_empty() {
            query.select(&options.select);
        }

        Ok(self.page_plan(data, options, default_per_page))
    }

    fn auto_select(&self, query: &mut dyn Query, options: &FilterOptions) {
        let select = self.config.auto_select;
        let eager = self.config.auto_eager_load;
        if !select && !eager {
            return;
        }
        let Some(formats) = self.definition.formats() else {
            return;
        };

        let spec = formats.resolve(
            options.view.as_deref(),
            options.action.as_deref(),
            &self.config.sigils.exclusive_view,
        );
        add_select_and_eager_load(query, &spec, &self.config.sigils, select, eager);
    }

    fn dispatch(
        &self,
        query: &mut dyn Query,
        data: &Map<String, Value>,
        ctx: &FilterContext<'_>,
    ) -> Result<()> {
        for (key, value) in data {
            let name = to_camel_case(key);

            if self.is_blocked(&name, ctx.user()) {
                tracing::debug!(key = %key, operation = %name, "filter key is guarded, skipping");
                continue;
            }

            let Some(operation) = self.definition.operation(&name) else {
                tracing::debug!(key = %key, "no filter operation for key, ignoring");
                continue;
            };

            operation(&mut *query, value, ctx).map_err(|e| Error::operation(&name, e))?;
        }
        Ok(())
    }

    fn is_blocked(&self, name: &str, user: Option<&dyn Identity>) -> bool {
        if is_base_guarded(name) || self.definition.is_guarded(name) {
            return true;
        }
        self.definition.is_admin_only(name) && !user.is_some_and(|user| user.is_admin())
    }

    fn page_plan(&self, data: &Map<String, Value>, options: &FilterOptions, default_per_page: u32) -> PagePlan {
        let pagination = &self.config.pagination;

        let page = data.get("page").and_then(value_as_u32).unwrap_or(1).max(1);

        let fallback = if default_per_page > 0 {
            default_per_page
        } else {
            pagination.per_page
        };
        let per_page = data
            .get("per_page")
            .and_then(value_as_u32)
            .unwrap_or(fallback)
            .clamp(1, pagination.max_per_page.max(1));

        let with_pages = options
            .with_pages
            .or_else(|| data.get("with_pages").and_then(value_as_bool))
            .unwrap_or(pagination.with_pages);
        let mode = if with_pages {
            PaginationMode::Full
        } else {
            PaginationMode::Simple
        };

        PagePlan { page, per_page, mode }
    }
}

/// Select the leaf columns of `spec` and eager-load its nested entries,
/// each restricted to its own leaves.
fn add_select_and_eager_load(
    query: &mut dyn Query,
    spec: &ProjectionSpec,
    sigils: &Sigils,
    select: bool,
    eager: bool,
) {
    if select {
        let mut columns: Vec<String> = spec
            .nodes()
            .iter()
            .filter_map(|node| match node {
                SpecNode::Leaf(token) => Some(sigils.parse(token).column.to_string()),
                SpecNode::Nested { .. } => None,
            })
            .collect();
        if columns.is_empty() {
            columns.push("*".to_string());
        }
        query.select(&columns);
    }

    if eager {
        for node in spec.nodes() {
            if let SpecNode::Nested { name, spec } = node {
                query.with_relation(name, &mut |related| {
                    add_select_and_eager_load(related, spec, sigils, select, eager);
                });
            }
        }
    }
}
