//! TypeScript / JavaScript route extractor
//!
//! Recognizes Fastify- and Express-style registrations:
//!
//! ```text
//! fastify.post('/bookings', { schema: { body }, preHandler: [auth] }, handler)
//! fastify.route({ method: 'GET', url: '/bookings', schema, handler })
//! router.patch('/clients/:id', requireOwner, validate(UpdateClient), handler)
//! router.route('/sessions/:id').get(handler).delete(requireOwner, handler)
//! ```
//!
//! Extraction runs in three passes over the whole tree:
//!
//! 1. **Scan**: parse each file, collect bindings, imports and call sites
//! 2. **Link**: mount prefixes (`register(plugin, { prefix })`,
//!    `app.use('/x', router)`) and scope-wide hooks (`addHook`, `router.use`)
//! 3. **Routes**: turn registration call sites into [`ExtractedRoute`]s

use crate::auth::AuthRules;
use crate::error::{ExtractError, ExtractResult, ExtractWarning};
use crate::extractors::{Extraction, RouteSchemaExtractor, SourceFile};
use crate::ir::{Expr, Lowering};
use crate::resolve::{Bindings, Resolver};
use crate::schema::SchemaReducer;
use parity_model::{AuthClassification, ExtractedRoute, HttpMethod, SchemaShape, SourceLocation};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use tree_sitter::{Node, Parser};

const EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mts", "cts", "mjs", "cjs"];

const METHOD_NAMES: &[&str] = &["get", "post", "put", "patch", "delete", "del"];

const HOOK_NAMES: &[&str] = &["onRequest", "preHandler", "preValidation", "preParsing"];

const PARSE_METHODS: &[&str] = &[
    "parse",
    "safeParse",
    "parseAsync",
    "safeParseAsync",
    "validate",
    "validateSync",
];

/// Receivers that plausibly register routes; used only to decide whether an
/// unresolvable path deserves a warning
const ROUTER_HINTS: &[&str] = &["app", "router", "fastify", "server", "instance", "api", "routes"];

/// Prefix nesting guard
const MAX_PREFIX_DEPTH: usize = 8;

/// Prefix of the scope given to unnamed file-level functions
const ANONYMOUS_SCOPE: &str = "<anonymous>@";

/// Extractor for TypeScript and JavaScript sources
#[derive(Debug, Clone, Default)]
pub struct TypeScriptExtractor {
    route_prefix: Option<String>,
}

impl TypeScriptExtractor {
    /// Extractor without a global prefix
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a prefix prepended to every path that does not already carry it
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.route_prefix = if prefix.trim_matches('/').is_empty() {
            None
        } else {
            Some(join_paths(&[&prefix]))
        };
        self
    }
}

impl RouteSchemaExtractor for TypeScriptExtractor {
    fn name(&self) -> &'static str {
        "typescript"
    }

    fn extensions(&self) -> &[&str] {
        EXTENSIONS
    }

    fn can_extract(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let is_test = name.contains(".test.") || name.contains(".spec.") || name.ends_with(".d.ts");
        let in_test_dir = path
            .components()
            .any(|c| matches!(c, Component::Normal(n) if n == "__tests__" || n == "__mocks__"));
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| EXTENSIONS.contains(&ext));
        ext_ok && !is_test && !in_test_dir
    }

    fn priority(&self) -> i32 {
        10
    }

    fn extract(&self, root: &Path, sources: &[SourceFile]) -> ExtractResult<Extraction> {
        let mut ts = new_parser(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())?;
        let mut tsx = new_parser(tree_sitter_typescript::LANGUAGE_TSX.into())?;
        let mut extraction = Extraction::default();

        let mut scans = Vec::with_capacity(sources.len());
        for source in sources {
            let is_tsx = source
                .path
                .extension()
                .is_some_and(|e| e == "tsx" || e == "jsx");
            let parser = if is_tsx { &mut tsx } else { &mut ts };
            match scan_file(parser, source) {
                Ok(scan) => scans.push(scan),
                Err(warning) => {
                    warn!(file = %warning.file.display(), "skipping source file: {}", warning.message);
                    extraction.warnings.push(warning);
                }
            }
        }

        let mut global = Bindings::new();
        for scan in &scans {
            global.absorb(&scan.bindings);
        }
        let links = Links::collect(&scans, &global);
        debug!(
            files = scans.len(),
            bindings = global.len(),
            mounts = links.mounts.len(),
            "linked sources"
        );

        for scan in &scans {
            let ctx = FileContext {
                scan,
                resolver: Resolver::new(&scan.bindings, &global),
                links: &links,
                root,
                prefix: self.route_prefix.as_deref(),
            };
            for site in &scan.calls {
                match ctx.routes_at(site) {
                    Ok(routes) => extraction.routes.extend(routes),
                    Err(warning) => {
                        warn!(
                            file = %warning.file.display(),
                            line = warning.line,
                            "skipping route registration: {}",
                            warning.message
                        );
                        extraction.warnings.push(warning);
                    }
                }
            }
        }
        Ok(extraction)
    }
}

fn new_parser(language: tree_sitter::Language) -> ExtractResult<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|e| ExtractError::ParserInit(e.to_string()))?;
    Ok(parser)
}

/// One call expression with where it was found
#[derive(Debug, Clone)]
struct CallSite {
    expr: Expr,
    line: usize,
    /// Name of the enclosing named function, if any
    scope: Option<String>,
}

/// Per-file results of the scan pass
#[derive(Debug)]
struct FileScan {
    path: PathBuf,
    module: PathBuf,
    bindings: Bindings,
    /// Local import name to module key
    imports: HashMap<String, PathBuf>,
    calls: Vec<CallSite>,
}

fn scan_file(parser: &mut Parser, source: &SourceFile) -> Result<FileScan, ExtractWarning> {
    let tree = parser
        .parse(&source.text, None)
        .ok_or_else(|| ExtractWarning::new(&source.path, 0, "parser produced no tree"))?;
    let lowering = Lowering::new(&source.text);
    let mut scan = FileScan {
        path: source.path.clone(),
        module: module_key(&source.path),
        bindings: Bindings::new(),
        imports: HashMap::new(),
        calls: Vec::new(),
    };

    let mut stack: Vec<(Node<'_>, Option<String>)> = vec![(tree.root_node(), None)];
    while let Some((node, scope)) = stack.pop() {
        let mut child_scope = scope.clone();
        match node.kind() {
            "variable_declarator" => {
                if let Some(name) = bind_declarator(&lowering, node, &mut scan.bindings) {
                    child_scope = Some(name);
                }
            }
            "function_declaration" | "generator_function_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let name = lowering.text(name).to_string();
                    scan.bindings.bind(name.clone(), lowering.lower(node));
                    child_scope = Some(name);
                }
            }
            // `export default async function routes(app) {}` may parse as an expression
            "function_expression" | "function" | "generator_function" | "arrow_function" => {
                match node.child_by_field_name("name") {
                    Some(name) => child_scope = Some(lowering.text(name).to_string()),
                    // inline plugins at file level each keep their own hooks
                    None if scope.is_none() => child_scope = Some(anonymous_scope(node)),
                    None => {}
                }
            }
            "import_statement" => collect_imports(&lowering, node, &source.path, &mut scan),
            "call_expression" => {
                let expr = lowering.lower(node);
                // named function expressions passed inline open a scope
                if let Expr::Call { args, .. } = &expr {
                    if let Some(Expr::Function { name: Some(name), .. }) = args.iter().find(|a| a.is_function()) {
                        child_scope = Some(name.clone());
                    }
                }
                scan.calls.push(CallSite {
                    expr,
                    line: node.start_position().row + 1,
                    scope: scope.clone(),
                });
            }
            _ => {}
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node.named_children(&mut cursor).collect();
        // reversed so sites are recorded in source order
        for child in children.into_iter().rev() {
            stack.push((child, child_scope.clone()));
        }
    }
    Ok(scan)
}

/// Scope name of an unnamed function, never a valid identifier
fn anonymous_scope(node: Node<'_>) -> String {
    let at = node.start_position();
    format!("{ANONYMOUS_SCOPE}{}:{}", at.row + 1, at.column + 1)
}

fn is_anonymous_scope(scope: &str) -> bool {
    scope.starts_with(ANONYMOUS_SCOPE)
}

/// Bind a declarator; returns the name when the value is a function
fn bind_declarator(lowering: &Lowering<'_>, node: Node<'_>, bindings: &mut Bindings) -> Option<String> {
    let name = node.child_by_field_name("name")?;
    let value = node.child_by_field_name("value")?;
    let init = lowering.lower(value);
    match name.kind() {
        "identifier" => {
            let name = lowering.text(name).to_string();
            let is_function = init.is_function();
            bindings.bind(name.clone(), init);
            is_function.then_some(name)
        }
        // const { a, b: c } = source
        "object_pattern" => {
            let mut cursor = name.walk();
            for part in name.named_children(&mut cursor) {
                let (key, local) = match part.kind() {
                    "shorthand_property_identifier_pattern" => {
                        let n = lowering.text(part).to_string();
                        (n.clone(), n)
                    }
                    "object_assignment_pattern" => {
                        let Some(left) = part.child_by_field_name("left") else {
                            continue;
                        };
                        let n = lowering.text(left).to_string();
                        (n.clone(), n)
                    }
                    "pair_pattern" => {
                        let (Some(k), Some(v)) = (part.child_by_field_name("key"), part.child_by_field_name("value")) else {
                            continue;
                        };
                        let target = if v.kind() == "assignment_pattern" {
                            v.child_by_field_name("left").unwrap_or(v)
                        } else {
                            v
                        };
                        if target.kind() != "identifier" {
                            continue;
                        }
                        (lowering.text(k).to_string(), lowering.text(target).to_string())
                    }
                    _ => continue,
                };
                bindings.bind(
                    local,
                    Expr::Member {
                        object: Box::new(init.clone()),
                        property: key,
                    },
                );
            }
            None
        }
        _ => None,
    }
}

fn collect_imports(lowering: &Lowering<'_>, node: Node<'_>, file: &Path, scan: &mut FileScan) {
    let Some(source) = node.child_by_field_name("source") else {
        return;
    };
    let Expr::Str(spec) = lowering.lower(source) else {
        return;
    };
    let target = spec.starts_with('.').then(|| resolve_module(file, &spec));
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        match current.kind() {
            "import_specifier" => {
                let name = current.child_by_field_name("name").map(|n| lowering.text(n).to_string());
                let alias = current.child_by_field_name("alias").map(|n| lowering.text(n).to_string());
                if let (Some(name), Some(alias)) = (&name, &alias) {
                    scan.bindings.bind(alias.clone(), Expr::Ident(name.clone()));
                }
                if let (Some(local), Some(target)) = (alias.or(name), &target) {
                    scan.imports.insert(local, target.clone());
                }
                continue;
            }
            "identifier" => {
                if let Some(target) = &target {
                    scan.imports.insert(lowering.text(current).to_string(), target.clone());
                }
                continue;
            }
            "string" => continue,
            _ => {}
        }
        let mut cursor = current.walk();
        stack.extend(current.named_children(&mut cursor));
    }
}

/// Module key: path without extension, `index` files keyed by their directory
fn module_key(path: &Path) -> PathBuf {
    let stripped = path.with_extension("");
    if stripped.file_name().is_some_and(|n| n == "index") {
        if let Some(parent) = stripped.parent() {
            return parent.to_path_buf();
        }
    }
    stripped
}

fn resolve_module(from: &Path, spec: &str) -> PathBuf {
    let base = from.parent().unwrap_or_else(|| Path::new(""));
    let mut out = PathBuf::new();
    for component in base.join(spec).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    let has_code_ext = out
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.contains(&e));
    if has_code_ext {
        out = out.with_extension("");
    }
    module_key(&out)
}

/// What a prefix or hook is attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MountKey {
    Module(PathBuf),
    Name(String),
}

/// Scope-wide guard registered before a route
#[derive(Debug, Clone)]
struct Hook {
    line: usize,
    unit: Expr,
}

/// Cross-file prefix mounts and hooks
#[derive(Debug, Default)]
struct Links {
    /// target → (prefix, keys of the mounting context)
    mounts: HashMap<MountKey, (String, Vec<MountKey>)>,
    /// (module, scope or receiver) → hooks
    hooks: HashMap<(PathBuf, String), Vec<Hook>>,
}

impl Links {
    fn collect(scans: &[FileScan], global: &Bindings) -> Self {
        let mut links = Self::default();
        for scan in scans {
            let resolver = Resolver::new(&scan.bindings, global);
            for site in &scan.calls {
                let Expr::Call { callee, args } = &site.expr else {
                    continue;
                };
                let Expr::Member { object: receiver, property } = callee.as_ref() else {
                    continue;
                };
                let receiver_name = receiver.callee_name().map(str::to_string);
                let context = context_keys(scan, site, receiver_name.as_deref());
                match property.as_str() {
                    "register" => {
                        let prefix = args
                            .get(1)
                            .and_then(|o| resolver.flatten_object(o))
                            .and_then(|props| props.into_iter().find(|(k, _)| k == "prefix"))
                            .and_then(|(_, v)| resolver.resolve_str(&v));
                        if let (Some(prefix), Some(target)) = (prefix, args.first().and_then(|a| mount_target(scan, a))) {
                            links.mounts.insert(target, (prefix, context));
                        }
                    }
                    "use" => {
                        let path = args.first().and_then(|a| resolver.resolve_str(a));
                        match path {
                            Some(path) if path.starts_with('/') => {
                                for target in args.iter().skip(1).filter_map(|a| mount_target(scan, a)) {
                                    links.mounts.insert(target, (path.clone(), context.clone()));
                                }
                            }
                            _ => {
                                // router.use(guard) applies to routes registered after it
                                if let Some(name) = receiver_name.clone() {
                                    let hooks = links.hooks.entry((scan.module.clone(), name)).or_default();
                                    hooks.extend(args.iter().map(|unit| Hook {
                                        line: site.line,
                                        unit: unit.clone(),
                                    }));
                                }
                            }
                        }
                    }
                    "addHook" => {
                        let hook = args.first().and_then(|a| resolver.resolve_str(a));
                        if let (Some(hook), Some(unit)) = (hook, args.get(1)) {
                            if HOOK_NAMES.contains(&hook.as_str()) {
                                let scope = site.scope.clone().unwrap_or_default();
                                links
                                    .hooks
                                    .entry((scan.module.clone(), scope))
                                    .or_default()
                                    .push(Hook {
                                        line: site.line,
                                        unit: unit.clone(),
                                    });
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        links
    }

    /// Effective mount prefix for the first key that has one
    fn prefix_for(&self, keys: &[MountKey], depth: usize) -> Option<String> {
        if depth > MAX_PREFIX_DEPTH {
            return None;
        }
        keys.iter().find_map(|key| {
            let (prefix, parent) = self.mounts.get(key)?;
            let outer = self.prefix_for(parent, depth + 1).unwrap_or_default();
            Some(join_paths(&[&outer, prefix]))
        })
    }

    fn hooks_before(&self, module: &Path, scope: &str, line: usize) -> impl Iterator<Item = &Expr> {
        self.hooks
            .get(&(module.to_path_buf(), scope.to_string()))
            .into_iter()
            .flatten()
            .filter(move |h| h.line < line)
            .map(|h| &h.unit)
    }
}

/// Keys identifying where a call site lives
fn context_keys(scan: &FileScan, site: &CallSite, receiver: Option<&str>) -> Vec<MountKey> {
    let mut keys = Vec::new();
    if let Some(scope) = &site.scope {
        keys.push(MountKey::Name(scope.clone()));
    }
    if let Some(receiver) = receiver {
        keys.push(MountKey::Name(receiver.to_string()));
    }
    keys.push(MountKey::Module(scan.module.clone()));
    keys
}

/// What a `register(x)` / `use('/p', x)` argument mounts
fn mount_target(scan: &FileScan, arg: &Expr) -> Option<MountKey> {
    match arg {
        Expr::Ident(name) => {
            if let Some(module) = scan.imports.get(name) {
                return Some(MountKey::Module(module.clone()));
            }
            // const routes = require('./routes')
            let required = scan
                .bindings
                .get(name)
                .filter(|init| matches!(init, Expr::Call { .. }))
                .and_then(|init| mount_target(scan, init));
            Some(required.unwrap_or_else(|| MountKey::Name(name.clone())))
        }
        // require('./x') and import('./x')
        Expr::Call { callee, args } if matches!(callee.as_ref(), Expr::Ident(n) if n == "require" || n == "import") => {
            let spec = args.first()?.as_str()?;
            Some(MountKey::Module(resolve_module(&scan.path, spec)))
        }
        Expr::Member { object, .. } => mount_target(scan, object),
        Expr::Function { name: Some(name), .. } => Some(MountKey::Name(name.clone())),
        _ => None,
    }
}

/// A recognized registration before request shapes are attached
struct Registration<'e> {
    methods: Vec<HttpMethod>,
    path: String,
    receiver: Option<String>,
    /// Options objects and middleware, in order
    middle: Vec<&'e Expr>,
    handler: Option<Expr>,
}

/// Request-side facts gathered for one registration
#[derive(Debug, Default)]
struct RouteParts {
    auth: AuthClassification,
    body: Option<SchemaShape>,
    query: Option<SchemaShape>,
    multipart: Vec<String>,
}

impl RouteParts {
    fn set_body(&mut self, shape: SchemaShape) {
        if self.body.is_none() && shape != SchemaShape::Unknown {
            self.body = Some(shape);
        }
    }

    fn set_query(&mut self, shape: SchemaShape) {
        if self.query.is_none() && shape != SchemaShape::Unknown {
            self.query = Some(shape);
        }
    }

    fn add_multipart(&mut self, field: String) {
        if !self.multipart.contains(&field) {
            self.multipart.push(field);
        }
    }
}

/// Per-file view used by the route pass
struct FileContext<'a> {
    scan: &'a FileScan,
    resolver: Resolver<'a>,
    links: &'a Links,
    root: &'a Path,
    prefix: Option<&'a str>,
}

impl<'a> FileContext<'a> {
    fn warning(&self, line: usize, message: impl Into<String>) -> ExtractWarning {
        ExtractWarning::new(&self.scan.path, line, message)
    }

    /// Routes registered by one call site; empty when it is not a
    /// registration
    fn routes_at(&self, site: &CallSite) -> Result<Vec<ExtractedRoute>, ExtractWarning> {
        let Some(registration) = self.recognize(site)? else {
            return Ok(Vec::new());
        };
        let mut parts = RouteParts::default();
        let rules = AuthRules::new(self.resolver);

        let scope_hooks = site.scope.as_deref().unwrap_or_default();
        let mut units: Vec<&Expr> = Vec::new();
        // file-level hooks reach the inline plugins registered below them
        if is_anonymous_scope(scope_hooks) {
            units.extend(self.links.hooks_before(&self.scan.module, "", site.line));
        }
        units.extend(self.links.hooks_before(&self.scan.module, scope_hooks, site.line));
        if let Some(receiver) = &registration.receiver {
            units.extend(self.links.hooks_before(&self.scan.module, receiver, site.line));
        }
        parts.auth = rules.classify_units(units);

        for item in &registration.middle {
            self.apply_middle(item, &rules, &mut parts, 0);
        }
        if let Some(handler) = &registration.handler {
            self.scan_handler(handler, &mut parts);
        }

        let mount = self.links.prefix_for(
            &context_keys(self.scan, site, registration.receiver.as_deref()),
            0,
        );
        let mut path = join_paths(&[mount.as_deref().unwrap_or_default(), &registration.path]);
        if let Some(prefix) = self.prefix {
            if !(path == prefix || path.starts_with(&format!("{prefix}/"))) {
                path = join_paths(&[prefix, &path]);
            }
        }

        let file = self
            .scan
            .path
            .strip_prefix(self.root)
            .map_or_else(|_| self.scan.path.clone(), Path::to_path_buf);
        Ok(registration
            .methods
            .iter()
            .map(|method| ExtractedRoute {
                method: *method,
                path_template: path.clone(),
                auth: parts.auth,
                body: parts.body.clone(),
                query: parts.query.clone(),
                multipart_fields: parts.multipart.clone(),
                source: SourceLocation {
                    file: file.clone(),
                    line: site.line,
                },
            })
            .collect())
    }

    fn recognize<'e>(&self, site: &'e CallSite) -> Result<Option<Registration<'e>>, ExtractWarning> {
        let Expr::Call { callee, args } = &site.expr else {
            return Ok(None);
        };
        let Expr::Member { object: receiver, property } = callee.as_ref() else {
            return Ok(None);
        };
        let method_name = property.to_ascii_lowercase();

        if property == "route" && args.len() == 1 {
            return Ok(self.declarative(receiver, &args[0]));
        }
        if !METHOD_NAMES.contains(&method_name.as_str()) {
            return Ok(None);
        }
        let Ok(method) = method_name.parse::<HttpMethod>() else {
            return Ok(None);
        };

        // router.route('/path').get(...).delete(...)
        if let Some((router, path_arg)) = route_chain(receiver) {
            let Some(path) = self.resolver.resolve_str(path_arg) else {
                return Err(self.warning(site.line, "route() path is not a string literal"));
            };
            let (handler, middle) = split_handler(args);
            return Ok(Some(Registration {
                methods: vec![method],
                path,
                receiver: router.callee_name().map(str::to_string),
                middle,
                handler,
            }));
        }

        if args.len() < 2 {
            return Ok(None);
        }
        match self.resolver.resolve_str(&args[0]) {
            Some(path) if path.starts_with('/') || path.is_empty() => {
                let (handler, middle) = split_handler(&args[1..]);
                Ok(Some(Registration {
                    methods: vec![method],
                    path,
                    receiver: receiver.callee_name().map(str::to_string),
                    middle,
                    handler,
                }))
            }
            Some(_) => Ok(None),
            None => {
                let receiver_name = receiver.callee_name().unwrap_or_default().to_ascii_lowercase();
                let looks_like_router = ROUTER_HINTS.iter().any(|h| receiver_name.contains(h));
                let has_handler = args.last().is_some_and(|a| self.resolver.resolve(a).is_function());
                if looks_like_router && has_handler {
                    Err(self.warning(
                        site.line,
                        format!("{} path does not resolve to a string", method.as_str()),
                    ))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// `fastify.route({ method, url, ... })`
    fn declarative<'e>(&self, receiver: &Expr, options: &'e Expr) -> Option<Registration<'e>> {
        let props = self.resolver.flatten_object(options)?;
        let get = |key: &str| props.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
        let path = get("url")
            .or_else(|| get("path"))
            .and_then(|p| self.resolver.resolve_str(&p))?;
        let methods: Vec<HttpMethod> = match get("method").map(|m| self.resolver.resolve(&m)) {
            Some(Expr::Str(m)) => m.parse().ok().into_iter().collect(),
            Some(Expr::Array(items)) => items
                .iter()
                .filter_map(|i| self.resolver.resolve_str(i))
                .filter_map(|m| m.parse().ok())
                .collect(),
            _ => Vec::new(),
        };
        if methods.is_empty() {
            return None;
        }
        Some(Registration {
            methods,
            path,
            receiver: receiver.callee_name().map(str::to_string),
            middle: vec![options],
            handler: get("handler"),
        })
    }

    fn apply_middle(&self, item: &Expr, rules: &AuthRules<'_>, parts: &mut RouteParts, depth: usize) {
        if depth > 4 {
            return;
        }
        let resolved = self.resolver.resolve(item);
        if let Expr::Array(items) = &resolved {
            for inner in items {
                self.apply_middle(inner, rules, parts, depth + 1);
            }
            return;
        }
        if self.apply_validator(&resolved, parts) {
            return;
        }
        let fields = multipart_fields(&resolved, &self.resolver);
        if !fields.is_empty() {
            for field in fields {
                parts.add_multipart(field);
            }
            return;
        }
        if let Some(props) = self.resolver.flatten_object(&resolved) {
            self.apply_options(&props, rules, parts);
            return;
        }
        if let Some(class) = rules.classify_unit(item) {
            parts.auth = parts.auth.restrict(class);
        }
    }

    /// Fastify route options
    fn apply_options(&self, props: &[(String, Expr)], rules: &AuthRules<'_>, parts: &mut RouteParts) {
        let reducer = SchemaReducer::new(self.resolver);
        for (key, value) in props {
            match key.as_str() {
                "schema" => {
                    let schema = self.resolver.flatten_object(value).unwrap_or_default();
                    for (part, shape) in &schema {
                        match part.as_str() {
                            "body" => parts.set_body(reducer.reduce(shape)),
                            "querystring" | "query" => parts.set_query(reducer.reduce(shape)),
                            "consumes" => {
                                if let Expr::Array(items) = self.resolver.resolve(shape) {
                                    let multipart = items
                                        .iter()
                                        .filter_map(|i| self.resolver.resolve_str(i))
                                        .any(|c| c.contains("multipart"));
                                    if multipart {
                                        parts.add_multipart("file".to_string());
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                }
                k if HOOK_NAMES.contains(&k) || k == "beforeHandler" => {
                    let units = match self.resolver.resolve(value) {
                        Expr::Array(items) => items,
                        _ => vec![value.clone()],
                    };
                    parts.auth = parts.auth.restrict(rules.classify_units(&units));
                }
                "config" => {
                    let config = self.resolver.flatten_object(value).unwrap_or_default();
                    for (ck, cv) in &config {
                        if matches!(ck.as_str(), "auth" | "role" | "roles") {
                            parts.auth = parts.auth.restrict(rules.classify_config_value(cv));
                        }
                    }
                }
                "auth" | "roles" => {
                    parts.auth = parts.auth.restrict(rules.classify_config_value(value));
                }
                "security" => {
                    if matches!(self.resolver.resolve(value), Expr::Array(items) if !items.is_empty()) {
                        parts.auth = parts.auth.restrict(AuthClassification::Either);
                    }
                }
                _ => {}
            }
        }
    }

    /// `validate(schema)`, `validateQuery(schema)`, `zValidator('json', s)`
    fn apply_validator(&self, expr: &Expr, parts: &mut RouteParts) -> bool {
        let Expr::Call { callee, args } = expr else {
            return false;
        };
        let Some(name) = callee.callee_name().map(str::to_ascii_lowercase) else {
            return false;
        };
        if !name.contains("validat") {
            return false;
        }
        let reducer = SchemaReducer::new(self.resolver);
        let mut target = if name.contains("query") {
            "query"
        } else if name.contains("param") {
            "params"
        } else {
            "body"
        };
        for arg in args {
            if let Some(s) = self.resolver.resolve_str(arg) {
                target = match s.as_str() {
                    "query" | "querystring" => "query",
                    "params" | "param" => "params",
                    _ => "body",
                };
            }
        }
        let Some(schema) = args.iter().find(|a| self.resolver.resolve_str(a).is_none()) else {
            return true;
        };
        // validate({ body: A, query: B })
        if let Some(props) = self.resolver.flatten_object(schema) {
            let segmented = !props.is_empty()
                && props
                    .iter()
                    .all(|(k, _)| matches!(k.as_str(), "body" | "query" | "querystring" | "params"));
            if segmented {
                for (k, v) in &props {
                    match k.as_str() {
                        "body" => parts.set_body(reducer.reduce(v)),
                        "query" | "querystring" => parts.set_query(reducer.reduce(v)),
                        _ => {}
                    }
                }
                return true;
            }
        }
        match target {
            "query" => parts.set_query(reducer.reduce(schema)),
            "body" => parts.set_body(reducer.reduce(schema)),
            _ => {}
        }
        true
    }

    /// Inline `Schema.parse(req.body)` and `request.file()` in the handler
    fn scan_handler(&self, handler: &Expr, parts: &mut RouteParts) {
        let Expr::Function { calls, .. } = self.resolver.resolve(handler) else {
            return;
        };
        let reducer = SchemaReducer::new(self.resolver);
        for call in &calls {
            let Expr::Call { callee, args } = call else {
                continue;
            };
            let Expr::Member { object, property } = callee.as_ref() else {
                continue;
            };
            if PARSE_METHODS.contains(&property.as_str()) {
                match args.first().and_then(request_part) {
                    Some("body") => parts.set_body(reducer.reduce(object)),
                    Some("query") => parts.set_query(reducer.reduce(object)),
                    _ => {}
                }
            } else if matches!(property.as_str(), "file" | "files" | "parts" | "saveRequestFiles")
                && is_request(object)
                && parts.multipart.is_empty()
            {
                parts.add_multipart("file".to_string());
            }
        }
    }
}

/// Router and path argument of an Express `route()` chain
fn route_chain(receiver: &Expr) -> Option<(&Expr, &Expr)> {
    let mut current = receiver;
    loop {
        let Expr::Call { callee, args } = current else {
            return None;
        };
        let Expr::Member { object, property } = callee.as_ref() else {
            return None;
        };
        if property == "route" && args.len() == 1 {
            return Some((object.as_ref(), &args[0]));
        }
        if !METHOD_NAMES.contains(&property.to_ascii_lowercase().as_str()) {
            return None;
        }
        current = object;
    }
}

/// Last function-like argument is the handler; everything before it is
/// options or middleware
fn split_handler(args: &[Expr]) -> (Option<Expr>, Vec<&Expr>) {
    match args.split_last() {
        Some((last, rest)) => (Some(last.clone()), rest.iter().collect()),
        None => (None, Vec::new()),
    }
}

fn is_request(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident(n) if n == "req" || n == "request")
        || matches!(expr, Expr::Member { property, .. } if property == "req" || property == "request")
}

/// `req.body` → `body`, `request.query` → `query`
fn request_part(expr: &Expr) -> Option<&'static str> {
    let Expr::Member { object, property } = expr else {
        return None;
    };
    if !is_request(object) {
        return None;
    }
    match property.as_str() {
        "body" => Some("body"),
        "query" => Some("query"),
        _ => None,
    }
}

/// Upload middleware fields (`upload.single('avatar')`, `multer().fields(...)`)
fn multipart_fields(expr: &Expr, resolver: &Resolver<'_>) -> Vec<String> {
    let Expr::Call { callee, args } = expr else {
        return Vec::new();
    };
    let Expr::Member { object, property } = callee.as_ref() else {
        return Vec::new();
    };
    let object_name = object.callee_name().unwrap_or_default().to_ascii_lowercase();
    if !(object_name.contains("upload") || object_name.contains("multer")) {
        return Vec::new();
    }
    match property.as_str() {
        "single" | "array" => args
            .first()
            .and_then(|a| resolver.resolve_str(a))
            .into_iter()
            .collect(),
        "fields" => match args.first().map(|a| resolver.resolve(a)) {
            Some(Expr::Array(items)) => items
                .iter()
                .filter_map(|i| resolver.flatten_object(i))
                .filter_map(|props| props.into_iter().find(|(k, _)| k == "name"))
                .filter_map(|(_, v)| resolver.resolve_str(&v))
                .collect(),
            _ => Vec::new(),
        },
        "any" => vec!["file".to_string()],
        _ => Vec::new(),
    }
}

/// Join path fragments into `/a/b/:c`, dropping empty segments and Express
/// regex constraints (`:id(\\d+)`)
fn join_paths(parts: &[&str]) -> String {
    let segments: Vec<String> = parts
        .iter()
        .flat_map(|p| p.split('/'))
        .filter(|s| !s.is_empty())
        .map(|s| match (s.starts_with(':'), s.find('(')) {
            (true, Some(idx)) => s[..idx].to_string(),
            _ => s.to_string(),
        })
        .collect();
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_model::StringFormat;
    use pretty_assertions::assert_eq;

    fn extract(files: &[(&str, &str)], prefix: Option<&str>) -> Extraction {
        let sources: Vec<SourceFile> = files
            .iter()
            .map(|(path, text)| SourceFile {
                path: PathBuf::from("/src").join(path),
                text: (*text).to_string(),
            })
            .collect();
        let mut extractor = TypeScriptExtractor::new();
        if let Some(p) = prefix {
            extractor = extractor.with_prefix(p);
        }
        extractor.extract(Path::new("/src"), &sources).unwrap()
    }

    fn keys(extraction: &Extraction) -> Vec<String> {
        extraction.routes.iter().map(ExtractedRoute::key).collect()
    }

    #[test]
    fn join_paths_normalizes() {
        assert_eq!(join_paths(&["/api/", "/clients/:id(\\d+)/"]), "/api/clients/:id");
        assert_eq!(join_paths(&["", ""]), "/");
    }

    #[test]
    fn module_keys() {
        assert_eq!(module_key(Path::new("/s/routes/index.ts")), PathBuf::from("/s/routes"));
        assert_eq!(
            resolve_module(Path::new("/s/app.ts"), "./routes/clients.js"),
            PathBuf::from("/s/routes/clients")
        );
    }

    #[test]
    fn fastify_shorthand_with_schema_and_prehandler() {
        let src = r"
            import { z } from 'zod';
            const CreateBooking = z.object({ clientId: z.string().uuid(), notes: z.string().optional() });
            export default async function bookingRoutes(fastify) {
                fastify.post('/bookings', {
                    schema: { body: CreateBooking },
                    preHandler: [fastify.authenticate, requireOwner],
                }, async (request, reply) => reply.send({}));
            }
        ";
        let out = extract(&[("bookings.ts", src)], Some("/api"));
        assert_eq!(keys(&out), vec!["POST /api/bookings"]);
        let route = &out.routes[0];
        assert_eq!(route.auth, AuthClassification::Owner);
        assert_eq!(route.body.as_ref().unwrap().required_keys(), vec!["clientId"]);
        assert_eq!(route.source.file, PathBuf::from("bookings.ts"));
    }

    #[test]
    fn express_middleware_and_inline_parse() {
        let src = r"
            const router = express.Router();
            const UpdateClient = z.object({ email: z.string().email() });
            router.patch('/clients/:id', requireClient, validate(UpdateClient), handler);
            router.get('/clients', authenticate, async (req, res) => {
                const q = ListQuery.parse(req.query);
                res.json([]);
            });
            const ListQuery = z.object({ limit: z.coerce.number().int() });
        ";
        let out = extract(&[("clients.ts", src)], None);
        assert_eq!(keys(&out), vec!["PATCH /clients/:id", "GET /clients"]);
        assert_eq!(out.routes[0].auth, AuthClassification::Dependent);
        let SchemaShape::Object { fields } = out.routes[0].body.as_ref().unwrap() else {
            panic!("object body expected");
        };
        assert_eq!(fields[0].shape, SchemaShape::formatted(StringFormat::Email));
        assert_eq!(out.routes[1].auth, AuthClassification::Either);
        assert_eq!(out.routes[1].query.as_ref().unwrap().required_keys(), vec!["limit"]);
    }

    #[test]
    fn declarative_route_with_method_list() {
        let src = r"
            const opts = { schema: { querystring: { type: 'object', properties: { page: { type: 'integer' } } } } };
            fastify.route({ method: ['GET', 'HEAD'], url: '/products', ...opts, handler: list });
        ";
        let out = extract(&[("products.ts", src)], Some("/api"));
        assert_eq!(keys(&out), vec!["GET /api/products"]);
        assert!(out.routes[0].query.is_some());
        assert_eq!(out.routes[0].auth, AuthClassification::Public);
    }

    #[test]
    fn register_prefix_across_files() {
        let app = r"
            import clientRoutes from './routes/clients';
            app.register(clientRoutes, { prefix: '/clients' });
        ";
        let routes = r"
            export default async function (fastify) {
                fastify.addHook('onRequest', fastify.authenticate);
                fastify.get('/:clientId', async () => ({}));
            }
        ";
        let out = extract(&[("app.ts", app), ("routes/clients.ts", routes)], Some("/api"));
        assert_eq!(keys(&out), vec!["GET /api/clients/:clientId"]);
        assert_eq!(out.routes[0].auth, AuthClassification::Either);
    }

    #[test]
    fn hooks_stay_inside_their_inline_plugin() {
        let src = r"
            fastify.register(async (fastify) => {
                fastify.addHook('onRequest', fastify.authenticate);
                fastify.get('/private', async () => ({}));
            });
            fastify.register(async (fastify) => {
                fastify.get('/open', async () => ({}));
            });
        ";
        let out = extract(&[("plugins.ts", src)], Some("/api"));
        let auth = |key: &str| {
            out.routes
                .iter()
                .find(|r| r.key() == key)
                .map(|r| r.auth)
                .unwrap_or_else(|| panic!("{key} not extracted: {:?}", keys(&out)))
        };
        assert_eq!(auth("GET /api/private"), AuthClassification::Either);
        assert_eq!(auth("GET /api/open"), AuthClassification::Public);
    }

    #[test]
    fn file_level_hooks_reach_inline_plugins() {
        let src = r"
            fastify.addHook('onRequest', fastify.authenticate);
            fastify.register(async (fastify) => {
                fastify.get('/inner', async () => ({}));
            });
        ";
        let out = extract(&[("plugins.ts", src)], Some("/api"));
        assert_eq!(keys(&out), vec!["GET /api/inner"]);
        assert_eq!(out.routes[0].auth, AuthClassification::Either);
    }

    #[test]
    fn express_use_mount_and_router_guard() {
        let app = r"
            const sales = require('./sales');
            app.use('/api/sales', sales);
        ";
        let sales = r"
            const router = Router();
            router.get('/public', list);
            router.use(requireOwner);
            router.post('/', upload.single('receipt'), create);
            module.exports = router;
        ";
        let out = extract(&[("app.js", app), ("sales.js", sales)], Some("/api"));
        assert_eq!(keys(&out), vec!["GET /api/sales/public", "POST /api/sales"]);
        assert_eq!(out.routes[0].auth, AuthClassification::Public);
        assert_eq!(out.routes[1].auth, AuthClassification::Owner);
        assert_eq!(out.routes[1].multipart_fields, vec!["receipt"]);
    }

    #[test]
    fn path_through_config_map() {
        let src = r"
            const PATHS = { webhooks: { stripe: '/webhooks/stripe' } };
            fastify.post(PATHS.webhooks.stripe, async () => ({}));
        ";
        let out = extract(&[("hooks.ts", src)], Some("/api"));
        assert_eq!(keys(&out), vec!["POST /api/webhooks/stripe"]);
    }

    #[test]
    fn unresolvable_path_warns_and_continues() {
        let src = r"
            router.get(buildPath(), async () => ({}));
            router.get('/ok', async () => ({}));
        ";
        let out = extract(&[("bad.ts", src)], None);
        assert_eq!(keys(&out), vec!["GET /ok"]);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].line, 2);
    }

    #[test]
    fn map_get_is_not_a_route() {
        let out = extract(&[("cache.ts", "const v = cache.get(key, () => 1);")], None);
        assert!(out.routes.is_empty());
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn express_route_chain() {
        let src = r"router.route('/sessions/:id').get(show).delete(requireOwner, destroy);";
        let out = extract(&[("sessions.ts", src)], None);
        let mut k = keys(&out);
        k.sort();
        assert_eq!(k, vec!["DELETE /sessions/:id", "GET /sessions/:id"]);
    }

    #[test]
    fn skips_test_files() {
        let ex = TypeScriptExtractor::new();
        assert!(ex.can_extract(Path::new("src/routes/a.ts")));
        assert!(!ex.can_extract(Path::new("src/routes/a.test.ts")));
        assert!(!ex.can_extract(Path::new("src/__tests__/a.ts")));
        assert!(!ex.can_extract(Path::new("src/types.d.ts")));
        assert!(!ex.can_extract(Path::new("README.md")));
    }
}
