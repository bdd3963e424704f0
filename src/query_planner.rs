use async_trait::async_trait;
use graphql_parser::parse_query;
use graphql_parser::query::{
    Definition, Document, OperationDefinition, Selection as AstSelection, Type as AstType,
    Value as AstValue,
};
use std::collections::HashSet;
use std::fmt::Write;

use crate::error::PlanningError;
use crate::response::Path;
use crate::schema_registry::{EntityKey, SupergraphSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    fn keyword(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }

    pub fn root_type(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
        }
    }
}

/// One argument of a field selection, pre-rendered to GraphQL source
/// with the variables it references collected for later definition
/// filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub rendered: String,
    pub variables: Vec<String>,
}

/// One node of the client's selection tree, fragments already inlined.
/// Immutable once the operation is parsed; the planner builds fresh
/// trees for each fetch node rather than mutating this one.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: Vec<Argument>,
    pub children: Vec<Selection>,
    /// Set when this selection sits under an inline fragment.
    pub type_condition: Option<String>,
    /// True for `__typename`/key fields the planner added to satisfy an
    /// entity reference; never client-requested.
    pub injected: bool,
}

impl Selection {
    fn field(name: &str) -> Self {
        Selection {
            name: name.to_string(),
            alias: None,
            arguments: Vec::new(),
            children: Vec::new(),
            type_condition: None,
            injected: false,
        }
    }

    fn injected_field(name: &str) -> Self {
        let mut sel = Self::field(name);
        sel.injected = true;
        sel
    }

    pub fn response_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A parsed and fragment-inlined operation, the planner's input.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub selections: Vec<Selection>,
    /// Variable name to rendered type, in declaration order.
    pub variable_definitions: Vec<(String, String)>,
}

/// What an entity-reference fetch needs from its dependency: the type
/// of the parent objects and the key fields to lift out of them.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRequirement {
    pub parent_type: String,
    pub key: EntityKey,
}

/// One planned call to one subgraph.
#[derive(Debug, Clone)]
pub struct FetchNode {
    pub id: usize,
    pub subgraph: String,
    pub operation: String,
    pub operation_kind: OperationKind,
    pub variable_usages: Vec<String>,
    /// Present on entity-reference fetches.
    pub requires: Option<EntityRequirement>,
    pub depends_on: Vec<usize>,
    /// Where this node's results land in the response tree: empty for
    /// root fetches, the path of the parent objects for entity fetches.
    pub produces_path: Path,
    /// Response paths of every client-requested field this node fetches.
    /// Injected `__typename`/key fields are not listed.
    pub field_paths: Vec<Path>,
}

impl FetchNode {
    /// The response paths to null out and attach errors to when this
    /// fetch fails: the first level of fields it produces.
    pub fn error_paths(&self) -> Vec<&Path> {
        let depth = self.produces_path.0.len() + 1;
        self.field_paths
            .iter()
            .filter(|p| p.0.len() == depth)
            .collect()
    }
}

/// Deterministically ordered DAG of fetch nodes. Nodes only ever depend
/// on earlier nodes, so the vector itself is a topological order.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub nodes: Vec<FetchNode>,
    /// The client's selection tree, kept for the post-execution reorder
    /// pass that fixes response field order.
    pub root_selections: Vec<Selection>,
}

impl QueryPlan {
    pub fn roots(&self) -> impl Iterator<Item = &FetchNode> {
        self.nodes.iter().filter(|n| n.depends_on.is_empty())
    }

    pub fn is_acyclic(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| n.depends_on.iter().all(|d| *d < n.id))
    }
}

#[async_trait]
pub trait QueryPlanner {
    async fn plan(
        &self,
        query: &str,
        operation_name: Option<&str>,
        schema: &SupergraphSchema,
    ) -> Result<QueryPlan, PlanningError>;
}

/// Planner that partitions the selection tree by field ownership and
/// cuts the tree at entity boundaries into dependent `_entities`
/// fetches.
pub struct FederatedQueryPlanner;

impl FederatedQueryPlanner {
    pub fn new() -> Self {
        FederatedQueryPlanner
    }
}

impl Default for FederatedQueryPlanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryPlanner for FederatedQueryPlanner {
    async fn plan(
        &self,
        query: &str,
        operation_name: Option<&str>,
        schema: &SupergraphSchema,
    ) -> Result<QueryPlan, PlanningError> {
        let operation = parse_operation(query, operation_name)?;
        plan_operation(&operation, schema)
    }
}

// ---------------------------------------------------------------------
// Parsing: query text -> Operation with fragments inlined

pub fn parse_operation(
    query: &str,
    operation_name: Option<&str>,
) -> Result<Operation, PlanningError> {
    let document: Document<'_, String> =
        parse_query(query).map_err(|e| PlanningError::ParseFailure(e.to_string()))?;

    let fragments: Vec<_> = document
        .definitions
        .iter()
        .filter_map(|d| match d {
            Definition::Fragment(f) => Some(f),
            _ => None,
        })
        .collect();

    let mut selected = None;
    for definition in &document.definitions {
        let Definition::Operation(op) = definition else {
            continue;
        };
        let name = match op {
            OperationDefinition::Query(q) => q.name.as_deref(),
            OperationDefinition::Mutation(m) => m.name.as_deref(),
            OperationDefinition::Subscription(_) => {
                return Err(PlanningError::SubscriptionUnsupported);
            }
            OperationDefinition::SelectionSet(_) => None,
        };
        let matches = match operation_name {
            Some(wanted) => name == Some(wanted),
            None => true,
        };
        if matches {
            if selected.is_some() && operation_name.is_none() {
                return Err(PlanningError::UnknownOperation(None));
            }
            selected = Some(op);
        }
    }
    let op = selected
        .ok_or_else(|| PlanningError::UnknownOperation(operation_name.map(str::to_string)))?;

    let (kind, name, var_defs, selection_set) = match op {
        OperationDefinition::Query(q) => (
            OperationKind::Query,
            q.name.clone(),
            &q.variable_definitions[..],
            &q.selection_set,
        ),
        OperationDefinition::Mutation(m) => (
            OperationKind::Mutation,
            m.name.clone(),
            &m.variable_definitions[..],
            &m.selection_set,
        ),
        OperationDefinition::SelectionSet(s) => (OperationKind::Query, None, &[][..], s),
        OperationDefinition::Subscription(_) => unreachable!(),
    };

    let mut seen_fragments = HashSet::new();
    let selections = convert_selection_set(selection_set, &fragments, &mut seen_fragments)?;
    if selections.is_empty() {
        return Err(PlanningError::EmptyPlan);
    }

    Ok(Operation {
        kind,
        name,
        selections,
        variable_definitions: var_defs
            .iter()
            .map(|v| (v.name.clone(), render_type(&v.var_type)))
            .collect(),
    })
}

fn convert_selection_set<'a>(
    set: &graphql_parser::query::SelectionSet<'a, String>,
    fragments: &[&graphql_parser::query::FragmentDefinition<'a, String>],
    in_flight: &mut HashSet<String>,
) -> Result<Vec<Selection>, PlanningError> {
    let mut out = Vec::new();
    for item in &set.items {
        match item {
            AstSelection::Field(field) => {
                out.push(Selection {
                    name: field.name.clone(),
                    alias: field.alias.clone(),
                    arguments: field
                        .arguments
                        .iter()
                        .map(|(name, value)| Argument {
                            name: name.clone(),
                            rendered: render_value(value),
                            variables: collect_variables(value),
                        })
                        .collect(),
                    children: convert_selection_set(&field.selection_set, fragments, in_flight)?,
                    type_condition: None,
                    injected: false,
                });
            }
            AstSelection::InlineFragment(frag) => {
                let condition = frag.type_condition.as_ref().map(|tc| {
                    let graphql_parser::query::TypeCondition::On(name) = tc;
                    name.clone()
                });
                let children = convert_selection_set(&frag.selection_set, fragments, in_flight)?;
                merge_conditioned(&mut out, condition, children);
            }
            AstSelection::FragmentSpread(spread) => {
                let fragment = fragments
                    .iter()
                    .find(|f| f.name == spread.fragment_name)
                    .ok_or_else(|| {
                        PlanningError::ParseFailure(format!(
                            "unknown fragment: {}",
                            spread.fragment_name
                        ))
                    })?;
                if !in_flight.insert(fragment.name.clone()) {
                    return Err(PlanningError::ParseFailure(format!(
                        "recursive fragment: {}",
                        fragment.name
                    )));
                }
                let graphql_parser::query::TypeCondition::On(on_type) = &fragment.type_condition;
                let children =
                    convert_selection_set(&fragment.selection_set, fragments, in_flight)?;
                in_flight.remove(&fragment.name);
                merge_conditioned(&mut out, Some(on_type.clone()), children);
            }
        }
    }
    Ok(out)
}

/// Fragment selections carry their type condition down onto each
/// top-level field of the fragment body.
fn merge_conditioned(out: &mut Vec<Selection>, condition: Option<String>, children: Vec<Selection>) {
    for mut child in children {
        if child.type_condition.is_none() {
            child.type_condition = condition.clone();
        }
        out.push(child);
    }
}

fn render_value<'a>(value: &AstValue<'a, String>) -> String {
    match value {
        AstValue::Variable(name) => format!("${}", name),
        AstValue::Int(n) => n
            .as_i64()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "0".to_string()),
        AstValue::Float(f) => f.to_string(),
        AstValue::String(s) => format!("{:?}", s),
        AstValue::Boolean(b) => b.to_string(),
        AstValue::Null => "null".to_string(),
        AstValue::Enum(e) => e.clone(),
        AstValue::List(items) => {
            let rendered: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", rendered.join(", "))
        }
        AstValue::Object(fields) => {
            let rendered: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("{}: {}", k, render_value(v)))
                .collect();
            format!("{{{}}}", rendered.join(", "))
        }
    }
}

fn collect_variables<'a>(value: &AstValue<'a, String>) -> Vec<String> {
    let mut vars = Vec::new();
    fn walk<'a>(value: &AstValue<'a, String>, vars: &mut Vec<String>) {
        match value {
            AstValue::Variable(name) => {
                if !vars.contains(name) {
                    vars.push(name.clone());
                }
            }
            AstValue::List(items) => items.iter().for_each(|v| walk(v, vars)),
            AstValue::Object(fields) => fields.values().for_each(|v| walk(v, vars)),
            _ => {}
        }
    }
    walk(value, &mut vars);
    vars
}

fn render_type<'a>(t: &AstType<'a, String>) -> String {
    match t {
        AstType::NamedType(name) => name.clone(),
        AstType::ListType(inner) => format!("[{}]", render_type(inner)),
        AstType::NonNullType(inner) => format!("{}!", render_type(inner)),
    }
}

// ---------------------------------------------------------------------
// Planning: Operation -> QueryPlan

/// A foreign-owned subtree detached from its parent fetch, waiting to
/// become a dependent `_entities` node.
struct Cut {
    parent_type: String,
    owner: String,
    path: Path,
    depends_on: usize,
    selections: Vec<Selection>,
}

struct NodeDraft {
    selections: Vec<Selection>,
    variable_usages: Vec<String>,
    field_paths: Vec<Path>,
}

impl NodeDraft {
    fn new() -> Self {
        NodeDraft {
            selections: Vec::new(),
            variable_usages: Vec::new(),
            field_paths: Vec::new(),
        }
    }

    fn use_variables(&mut self, vars: &[String]) {
        for v in vars {
            if !self.variable_usages.contains(v) {
                self.variable_usages.push(v.clone());
            }
        }
    }
}

pub fn plan_operation(
    operation: &Operation,
    schema: &SupergraphSchema,
) -> Result<QueryPlan, PlanningError> {
    let root_type = operation.kind.root_type();
    schema.type_def(root_type)?;

    // Step 1: contiguous runs of same-owner root fields become candidate
    // nodes. `__typename` has no owner and joins the surrounding run.
    let mut groups: Vec<(String, Vec<&Selection>)> = Vec::new();
    let mut pending_typenames: Vec<&Selection> = Vec::new();
    for selection in &operation.selections {
        if selection.name == "__typename" {
            match groups.last_mut() {
                Some((_, fields)) => fields.push(selection),
                None => pending_typenames.push(selection),
            }
            continue;
        }
        let owner = schema
            .resolve_field_owner(root_type, &selection.name)?
            .to_string();
        match groups.last_mut() {
            Some((current, fields)) if *current == owner => fields.push(selection),
            _ => groups.push((owner, vec![selection])),
        }
    }
    if groups.is_empty() {
        return Err(PlanningError::EmptyPlan);
    }
    if !pending_typenames.is_empty() {
        let (_, first) = &mut groups[0];
        for (i, tn) in pending_typenames.into_iter().enumerate() {
            first.insert(i, tn);
        }
    }

    let mut nodes: Vec<FetchNode> = Vec::new();
    let mut cuts: Vec<Cut> = Vec::new();

    for (owner, fields) in &groups {
        let id = nodes.len();
        let mut draft = NodeDraft::new();
        for field in fields {
            let mut kept = keep_field(schema, owner, root_type, field, &Path::empty(), id, &mut draft, &mut cuts)?;
            // A fragment on the root type adds nothing; inline it flat.
            if kept.type_condition.as_deref() == Some(root_type) {
                kept.type_condition = None;
            }
            draft.selections.push(kept);
        }
        // Top-level mutations run serially, in selection order.
        let depends_on = match operation.kind {
            OperationKind::Mutation if id > 0 => vec![id - 1],
            _ => Vec::new(),
        };
        let operation_text = render_root_operation(operation, &draft);
        nodes.push(FetchNode {
            id,
            subgraph: owner.clone(),
            operation: operation_text,
            operation_kind: operation.kind,
            variable_usages: draft.variable_usages,
            requires: None,
            depends_on,
            produces_path: Path::empty(),
            field_paths: draft.field_paths,
        });
    }

    // Step 2: realize cuts breadth-first, in discovery order. Each cut
    // may discover deeper cuts of its own. Sibling cuts sharing the
    // same target, path and dependency were already batched when they
    // were recorded.
    let mut next = 0;
    while next < cuts.len() {
        let id = nodes.len();
        let cut = &cuts[next];
        let mut draft = NodeDraft::new();
        let mut kept = Vec::new();
        let parent_type = cut.parent_type.clone();
        let owner = cut.owner.clone();
        let path = cut.path.clone();
        let depends_on = cut.depends_on;
        let selections = cut.selections.clone();
        for field in &selections {
            let sel = keep_field(schema, &owner, &parent_type, field, &path, id, &mut draft, &mut cuts)?;
            kept.push(sel);
        }
        draft.selections = kept;
        let key = schema.entity_key_for(&parent_type)?.clone();
        let operation_text = render_entity_operation(operation, &parent_type, &draft);
        nodes.push(FetchNode {
            id,
            subgraph: owner,
            operation: operation_text,
            operation_kind: OperationKind::Query,
            variable_usages: draft.variable_usages,
            requires: Some(EntityRequirement { parent_type, key }),
            depends_on: vec![depends_on],
            produces_path: path,
            field_paths: draft.field_paths,
        });
        next += 1;
    }

    Ok(QueryPlan {
        nodes,
        root_selections: operation.selections.clone(),
    })
}

/// Decides what part of `selection` stays in the fetch targeting
/// `subgraph`, recording entity cuts for everything foreign-owned.
#[allow(clippy::too_many_arguments)]
fn keep_field(
    schema: &SupergraphSchema,
    subgraph: &str,
    parent_type: &str,
    selection: &Selection,
    path: &Path,
    node_id: usize,
    draft: &mut NodeDraft,
    cuts: &mut Vec<Cut>,
) -> Result<Selection, PlanningError> {
    let field_path = path.child(selection.response_name());
    if !selection.injected {
        draft.field_paths.push(field_path.clone());
    }
    for argument in &selection.arguments {
        draft.use_variables(&argument.variables);
    }

    if selection.name == "__typename" {
        let mut kept = selection.clone();
        kept.children = Vec::new();
        return Ok(kept);
    }

    let field_def = schema.field(parent_type, &selection.name)?;
    let field_type = field_def.field_type.name.clone();

    let mut kept = selection.clone();
    kept.children = Vec::new();
    if selection.children.is_empty() {
        return Ok(kept);
    }

    kept.children = partition_children(
        schema,
        subgraph,
        &field_type,
        &selection.children,
        &field_path,
        node_id,
        draft,
        cuts,
    )?;
    Ok(kept)
}

/// Splits the children of a composite field between the current fetch
/// and entity cuts, injecting `__typename` + key fields wherever a cut
/// is taken.
#[allow(clippy::too_many_arguments)]
fn partition_children(
    schema: &SupergraphSchema,
    subgraph: &str,
    parent_type: &str,
    children: &[Selection],
    parent_path: &Path,
    node_id: usize,
    draft: &mut NodeDraft,
    cuts: &mut Vec<Cut>,
) -> Result<Vec<Selection>, PlanningError> {
    let mut kept: Vec<Selection> = Vec::new();
    // (owner, concrete type) -> index into `cuts`, so sibling fields
    // bound for the same subgraph batch into one dependent fetch.
    let mut cut_index: Vec<((String, String), usize)> = Vec::new();
    // Concrete types whose key must come back with the parent objects.
    let mut key_types: Vec<String> = Vec::new();

    for child in children {
        // Inline fragments restrict the child to one concrete type.
        let concrete_type = child.type_condition.as_deref().unwrap_or(parent_type);
        if concrete_type != parent_type {
            let parent_def = schema.type_def(parent_type)?;
            let valid = parent_def.is_abstract()
                && parent_def.possible_types.iter().any(|t| t == concrete_type);
            if !valid {
                return Err(PlanningError::ParseFailure(format!(
                    "type condition {} does not apply to {}",
                    concrete_type, parent_type
                )));
            }
        }

        if child.name == "__typename" {
            if !child.injected {
                draft
                    .field_paths
                    .push(parent_path.child(child.response_name()));
            }
            let mut tn = child.clone();
            tn.children = Vec::new();
            if concrete_type == parent_type {
                tn.type_condition = None;
            }
            kept.push(tn);
            continue;
        }

        let field_def = schema.field(concrete_type, &child.name)?;
        let fetchable_here = field_def.owner_subgraph == subgraph
            || (field_def.shared && schema.resolvable_in(concrete_type, subgraph));

        if fetchable_here {
            let mut sel = keep_field(
                schema,
                subgraph,
                concrete_type,
                child,
                parent_path,
                node_id,
                draft,
                cuts,
            )?;
            // A condition matching the parent type restricts nothing
            // (fragments inline flat); only conditions narrowing an
            // abstract parent survive into the rendered operation.
            if concrete_type == parent_type {
                sel.type_condition = None;
            }
            kept.push(sel);
            continue;
        }

        // Foreign-owned: the parent objects must be resolvable by key
        // in the owning subgraph, otherwise the field is unreachable.
        let owner = field_def.owner_subgraph.clone();
        let type_def = schema.type_def(concrete_type)?;
        if !type_def.is_entity() || !schema.resolvable_in(concrete_type, &owner) {
            return Err(PlanningError::UnreachableField {
                type_name: concrete_type.to_string(),
                field_name: child.name.clone(),
                owner,
            });
        }
        if !key_types.iter().any(|t| t == concrete_type) {
            key_types.push(concrete_type.to_string());
        }

        let cut_key = (owner.clone(), concrete_type.to_string());
        let cut = match cut_index.iter().find(|(k, _)| *k == cut_key) {
            Some((_, i)) => &mut cuts[*i],
            None => {
                cuts.push(Cut {
                    parent_type: concrete_type.to_string(),
                    owner,
                    path: parent_path.clone(),
                    depends_on: node_id,
                    selections: Vec::new(),
                });
                cut_index.push((cut_key, cuts.len() - 1));
                cuts.last_mut().expect("just pushed")
            }
        };
        let mut detached = child.clone();
        detached.type_condition = None;
        cut.selections.push(detached);
    }

    for key_type in &key_types {
        inject_entity_key(schema, parent_type, key_type, &mut kept)?;
    }
    Ok(kept)
}

/// Ensures the parent fetch returns `__typename` plus the entity key so
/// representations can be built for the dependent fetch. Requested
/// fields are not duplicated. When the cut was taken under an inline
/// fragment on a concrete type behind an abstract parent, the key
/// fields go inside a fragment on that concrete type.
fn inject_entity_key(
    schema: &SupergraphSchema,
    parent_type: &str,
    key_type: &str,
    kept: &mut Vec<Selection>,
) -> Result<(), PlanningError> {
    let key = schema.entity_key_for(key_type)?;
    if !kept
        .iter()
        .any(|s| s.name == "__typename" && s.type_condition.is_none())
    {
        kept.push(Selection::injected_field("__typename"));
    }
    for key_field in key.fields() {
        let already_selected = kept.iter().any(|s| {
            s.name == *key_field
                && s.alias.is_none()
                && (s.type_condition.is_none()
                    || s.type_condition.as_deref() == Some(key_type))
        });
        if already_selected {
            continue;
        }
        let mut injected = Selection::injected_field(key_field);
        if key_type != parent_type {
            injected.type_condition = Some(key_type.to_string());
        }
        kept.push(injected);
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Operation text rendering

fn render_root_operation(operation: &Operation, draft: &NodeDraft) -> String {
    let mut text = String::new();
    text.push_str(operation.kind.keyword());
    render_variable_definitions(&mut text, operation, &draft.variable_usages, false);
    text.push(' ');
    render_selection_set(&mut text, &draft.selections);
    text
}

fn render_entity_operation(operation: &Operation, parent_type: &str, draft: &NodeDraft) -> String {
    let mut text = String::from("query");
    render_variable_definitions(&mut text, operation, &draft.variable_usages, true);
    text.push_str(" { _entities(representations: $representations) { ... on ");
    text.push_str(parent_type);
    text.push(' ');
    render_selection_set(&mut text, &draft.selections);
    text.push_str(" } }");
    text
}

fn render_variable_definitions(
    text: &mut String,
    operation: &Operation,
    usages: &[String],
    representations: bool,
) {
    let used: Vec<&(String, String)> = operation
        .variable_definitions
        .iter()
        .filter(|(name, _)| usages.contains(name))
        .collect();
    if used.is_empty() && !representations {
        return;
    }
    text.push('(');
    let mut first = true;
    if representations {
        text.push_str("$representations: [_Any!]!");
        first = false;
    }
    for (name, var_type) in used {
        if !first {
            text.push_str(", ");
        }
        let _ = write!(text, "${}: {}", name, var_type);
        first = false;
    }
    text.push(')');
}

fn render_selection_set(text: &mut String, selections: &[Selection]) {
    text.push_str("{ ");
    for selection in selections {
        render_selection(text, selection);
        text.push(' ');
    }
    text.push('}');
}

fn render_selection(text: &mut String, selection: &Selection) {
    if let Some(condition) = &selection.type_condition {
        let _ = write!(text, "... on {} ", condition);
        render_selection_set(text, std::slice::from_ref(&drop_condition(selection)));
        return;
    }
    if let Some(alias) = &selection.alias {
        let _ = write!(text, "{}: ", alias);
    }
    text.push_str(&selection.name);
    if !selection.arguments.is_empty() {
        text.push('(');
        for (i, argument) in selection.arguments.iter().enumerate() {
            if i > 0 {
                text.push_str(", ");
            }
            let _ = write!(text, "{}: {}", argument.name, argument.rendered);
        }
        text.push(')');
    }
    if !selection.children.is_empty() {
        text.push(' ');
        render_selection_set(text, &selection.children);
    }
}

fn drop_condition(selection: &Selection) -> Selection {
    let mut inner = selection.clone();
    inner.type_condition = None;
    inner
}
