use crate::error::Result;
use crate::query::compile::compile;
use crate::query::{CompiledFilter, FilterExpr, FilterInput, SortSpec};
use crate::table::Selection;

/// Filter, sort and paging for `find`.
///
/// ```ignore
/// let page = FindOptions::new().filter("age>=40").sort("age>").limit(10).offset(20);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    filter: Option<FilterInput>,
    sort: Option<SortSource>,
    limit: Option<usize>,
    offset: usize,
}

/// Filter and bounds for `delete`. Without a sort, limited deletes take rows
/// in storage order.
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    filter: Option<FilterInput>,
    sort: Option<SortSource>,
    limit: Option<usize>,
}

#[derive(Debug, Clone)]
enum SortSource {
    Text(String),
    Spec(SortSpec),
}

impl SortSource {
    fn resolve(self) -> Result<SortSpec> {
        match self {
            SortSource::Text(text) => SortSpec::parse(&text),
            SortSource::Spec(spec) => Ok(spec),
        }
    }
}

fn compile_input(filter: Option<FilterInput>) -> Result<Option<CompiledFilter>> {
    filter.map(|f| compile(&f.into_expr()?)).transpose()
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: impl Into<FilterInput>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Sort in the DSL form: `age<`, `age>` or `age=desc`.
    pub fn sort(mut self, sort: &str) -> Self {
        self.sort = Some(SortSource::Text(sort.to_string()));
        self
    }

    pub fn sort_by(mut self, spec: SortSpec) -> Self {
        self.sort = Some(SortSource::Spec(spec));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn into_selection(self) -> Result<Selection> {
        Ok(Selection {
            filter: compile_input(self.filter)?,
            sort: self.sort.map(SortSource::resolve).transpose()?,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

impl DeleteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: impl Into<FilterInput>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn sort(mut self, sort: &str) -> Self {
        self.sort = Some(SortSource::Text(sort.to_string()));
        self
    }

    pub fn sort_by(mut self, spec: SortSpec) -> Self {
        self.sort = Some(SortSource::Spec(spec));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub(crate) fn into_selection(self) -> Result<Selection> {
        Ok(Selection {
            filter: compile_input(self.filter)?,
            sort: self.sort.map(SortSource::resolve).transpose()?,
            limit: self.limit,
            offset: 0,
        })
    }
}

macro_rules! filter_conversions {
    ($($source:ty),*) => {
        $(
            impl From<$source> for FindOptions {
                fn from(filter: $source) -> Self {
                    FindOptions::new().filter(filter)
                }
            }

            impl From<$source> for DeleteOptions {
                fn from(filter: $source) -> Self {
                    DeleteOptions::new().filter(filter)
                }
            }
        )*
    };
}

filter_conversions!(&str, String, FilterExpr);

/// Which documents a field update applies to.
#[derive(Debug, Clone)]
pub enum FieldTarget {
    Id(String),
    Filter(FilterInput),
    All,
}

impl FieldTarget {
    pub fn id(id: impl Into<String>) -> Self {
        FieldTarget::Id(id.into())
    }

    pub fn filter(filter: impl Into<FilterInput>) -> Self {
        FieldTarget::Filter(filter.into())
    }

    pub(crate) fn compile(self) -> Result<Option<CompiledFilter>> {
        match self {
            FieldTarget::Id(id) => Ok(Some(CompiledFilter::by_key(&id))),
            FieldTarget::Filter(filter) => compile_input(Some(filter)),
            FieldTarget::All => Ok(None),
        }
    }
}

/// Result of `put` and `put_if_absent`.
#[derive(Debug, Clone, PartialEq)]
pub enum PutResult {
    /// The value as stored.
    Stored(serde_json::Value),
    AlreadyExists,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use crate::ShelfError;

    #[test]
    fn test_find_options_compile() {
        let selection = FindOptions::new()
            .filter("age>=40")
            .sort("age>")
            .limit(5)
            .offset(10)
            .into_selection()
            .unwrap();
        let filter = selection.filter.unwrap();
        assert_eq!(filter.clause, "json_extract(value, ?) >= ?");
        assert_eq!(selection.limit, Some(5));
        assert_eq!(selection.offset, 10);
        assert!(selection.sort.is_some());
    }

    #[test]
    fn test_builder_and_text_filters_agree() {
        let text = FindOptions::from("age>=40&&name=Tyson").into_selection().unwrap();
        let built = FindOptions::from(Filter::and([Filter::gte("age", 40), Filter::eq("name", "Tyson")]))
            .into_selection()
            .unwrap();
        assert_eq!(text.filter, built.filter);
    }

    #[test]
    fn test_bad_inputs_surface() {
        assert!(matches!(
            FindOptions::from("age").into_selection(),
            Err(ShelfError::MalformedFilter { .. })
        ));
        assert!(matches!(
            DeleteOptions::new().sort("age=sideways").into_selection(),
            Err(ShelfError::MalformedSort { .. })
        ));
        assert!(matches!(
            FindOptions::from(Filter::eq("owner..name", "x")).into_selection(),
            Err(ShelfError::MalformedFilter { .. })
        ));
        assert!(matches!(
            DeleteOptions::from(Filter::or(Vec::new())).into_selection(),
            Err(ShelfError::MalformedFilter { .. })
        ));
        assert!(matches!(
            FieldTarget::filter(Filter::regex("name", "(")).compile(),
            Err(ShelfError::MalformedFilter { .. })
        ));
    }

    #[test]
    fn test_field_target() {
        assert_eq!(
            FieldTarget::id("a").compile().unwrap(),
            Some(CompiledFilter::by_key("a"))
        );
        assert_eq!(FieldTarget::All.compile().unwrap(), None);
    }
}
