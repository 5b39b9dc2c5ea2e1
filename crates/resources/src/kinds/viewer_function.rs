//! Edge viewer-request functions: the sign-in gate and the origin path rewrite.
//!
//! The gate sends requests for protected paths without signed cookies to the
//! sign-in page and rewrites the rest to `/restricted-N`, where `N` is the
//! protected path's index. The rewrite function maps those back onto the
//! stored site root. Both are published after every code change.

use std::sync::Arc;

use async_trait::async_trait;
use rekon_core::{Error, Properties, ResourceOutput, Result};
use rekon_reconciler::{RemoteObjects, mutate_object};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{create_object, read_existing, remove};
use crate::handler::{InvocationContext, ResourceHandler};

const RUNTIME: &str = "cloudfront-js-2.0";
const STAGE_DEVELOPMENT: &str = "DEVELOPMENT";
const STAGE_LIVE: &str = "LIVE";

const INDEX_RESOLVER: &str = r"
function resolve(path) {
    if (path.endsWith('/')) { return '/@ROOT@' + path + 'index.html'; }
    if (path.indexOf('.') === -1) { return '/@ROOT@' + path + '/index.html'; }
    return '/@ROOT@' + path;
}
";

const GATE_CODE: &str = r"
var PROTECTED = '@PATHS@'.split(',');
var SIGNIN = '@SIGNIN@';
var SIGNED_COOKIES = ['CloudFront-Policy', 'CloudFront-Signature', 'CloudFront-Key-Pair-Id'];

function signed(cookies) {
    for (var i = 0; i < SIGNED_COOKIES.length; i++) {
        var cookie = cookies[SIGNED_COOKIES[i]];
        if (!cookie || !cookie.value || !cookie.value.trim()) { return false; }
    }
    return true;
}

function handler(event) {
    var request = event.request;
    var uri = request.uri;
    var index = -1;
    for (var i = 0; i < PROTECTED.length; i++) {
        if (uri.startsWith(PROTECTED[i])) { index = i; break; }
    }
    if (index === -1) {
        request.uri = resolve(uri);
        return request;
    }
    if (!signed(request.cookies)) {
        return {
            statusCode: 302,
            statusDescription: 'Found',
            headers: {
                'location': { value: SIGNIN + '?redirect_to=' + encodeURIComponent(uri) },
                'cache-control': { value: 'no-cache, no-store, must-revalidate' }
            }
        };
    }
    var rest = uri.substring(PROTECTED[index].length);
    request.uri = ('/restricted-' + index + '/' + rest).replace(/\/+/g, '/');
    return request;
}
";

const REWRITE_CODE: &str = r"
var PROTECTED = '@PATHS@'.split(',');

function handler(event) {
    var request = event.request;
    var match = request.uri.match(/^\/restricted-(\d+)(\/.*)?$/);
    if (match) {
        var index = parseInt(match[1], 10);
        if (index < PROTECTED.length) {
            var rest = match[2] || '/';
            var original = rest === '/' ? PROTECTED[index] : PROTECTED[index] + rest;
            request.uri = resolve(original);
        }
    }
    return request;
}
";

/// Which viewer-request function a handler provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionFlavor {
    /// Signed-cookie gate in front of the protected paths.
    SigninGate,
    /// Maps `/restricted-N` URIs back to the original paths under the site root.
    PathRewrite,
}

impl FunctionFlavor {
    const fn kind(self) -> &'static str {
        match self {
            Self::SigninGate => "Function",
            Self::PathRewrite => "PathRewriteFunction",
        }
    }

    const fn comment(self) -> &'static str {
        match self {
            Self::SigninGate => "Sign-in gate and path rewrite for protected content",
            Self::PathRewrite => "Rewrite restricted paths back to original paths",
        }
    }
}

/// Handler for `Function` and `PathRewriteFunction`.
pub struct ViewerFunctionHandler {
    flavor: FunctionFlavor,
    functions: Arc<dyn RemoteObjects>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FunctionSpec {
    name: String,
    protected_paths: Vec<String>,
    signin_path: Option<String>,
    www_root: String,
}

/// Values are spliced into single-quoted script literals.
fn literal_safe(key: &str, value: &str) -> Result<()> {
    if value.contains(['\'', '\\', '\n', '\r', ',']) {
        return Err(Error::invalid_properties(format!(
            "{key} contains a character not allowed in function code: '{value}'"
        )));
    }
    Ok(())
}

impl FunctionSpec {
    fn from_properties(flavor: FunctionFlavor, props: &Properties) -> Result<Self> {
        let name = props.require_str("Name")?.to_string();
        let protected_paths = props.require_list("ProtectedPaths")?;
        for path in &protected_paths {
            literal_safe("ProtectedPaths", path)?;
            if !path.starts_with('/') {
                return Err(Error::invalid_properties(format!(
                    "ProtectedPaths entries must start with '/', got '{path}'"
                )));
            }
        }
        let signin_path = match flavor {
            FunctionFlavor::SigninGate => {
                let path = props.require_str("SigninPagePath")?;
                literal_safe("SigninPagePath", path)?;
                Some(path.to_string())
            }
            FunctionFlavor::PathRewrite => None,
        };
        let www_root = props
            .opt_str("S3WWWRoot")
            .unwrap_or("www")
            .trim_matches('/')
            .to_string();
        literal_safe("S3WWWRoot", &www_root)?;
        Ok(Self {
            name,
            protected_paths,
            signin_path,
            www_root,
        })
    }

    fn code(&self, flavor: FunctionFlavor) -> String {
        let body = match flavor {
            FunctionFlavor::SigninGate => GATE_CODE,
            FunctionFlavor::PathRewrite => REWRITE_CODE,
        };
        format!("{INDEX_RESOLVER}{body}")
            .replace("@ROOT@", &self.www_root)
            .replace("@PATHS@", &self.protected_paths.join(","))
            .replace("@SIGNIN@", self.signin_path.as_deref().unwrap_or_default())
    }

    fn payload(&self, flavor: FunctionFlavor, stage: &str) -> Value {
        json!({
            "Name": self.name,
            "FunctionConfig": {"Comment": flavor.comment(), "Runtime": RUNTIME},
            "FunctionCode": self.code(flavor),
            "Stage": stage,
        })
    }
}

fn published(desired: &Value) -> impl Fn(&Value) -> Result<Value> + '_ {
    move |current| {
        let mut next = current.clone();
        if let (Value::Object(map), Value::Object(fields)) = (&mut next, desired) {
            map.extend(fields.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        Ok(next)
    }
}

impl ViewerFunctionHandler {
    pub fn new(flavor: FunctionFlavor, functions: Arc<dyn RemoteObjects>) -> Self {
        Self { flavor, functions }
    }

    /// Replace the stored code and config and move the function to the live stage.
    async fn publish(
        &self,
        ctx: &InvocationContext,
        id: &str,
        spec: &FunctionSpec,
    ) -> Result<bool> {
        let desired = spec.payload(self.flavor, STAGE_LIVE);
        let mutation = mutate_object(
            &ctx.budget,
            &ctx.config.conflict_retry,
            self.functions.as_ref(),
            id,
            published(&desired),
        )
        .await?;
        Ok(mutation.was_written())
    }

    async fn provision(
        &self,
        ctx: &InvocationContext,
        spec: &FunctionSpec,
    ) -> Result<ResourceOutput> {
        let payload = spec.payload(self.flavor, STAGE_DEVELOPMENT);
        let function = create_object(ctx, self.functions.as_ref(), &spec.name, "", payload).await?;
        self.publish(ctx, &function.id, spec).await?;
        info!(id = %function.id, name = %spec.name, "Function published");
        Ok(Self::output(ctx, &function.id, spec))
    }

    fn output(ctx: &InvocationContext, id: &str, spec: &FunctionSpec) -> ResourceOutput {
        ResourceOutput::new(id)
            .with("FunctionName", spec.name.as_str())
            .with("FunctionARN", ctx.arn("cloudfront", &format!("function/{}", spec.name)))
    }
}

#[async_trait]
impl ResourceHandler for ViewerFunctionHandler {
    fn kind(&self) -> &str {
        self.flavor.kind()
    }

    async fn create(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let spec = FunctionSpec::from_properties(self.flavor, ctx.properties())?;
        info!(name = %spec.name, kind = self.flavor.kind(), "Creating viewer function");
        self.provision(ctx, &spec).await
    }

    async fn update(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        let spec = FunctionSpec::from_properties(self.flavor, ctx.properties())?;

        if read_existing(ctx, self.functions.as_ref(), id)
            .await?
            .is_none()
        {
            warn!(id, "Function not found, recreating");
            return self.provision(ctx, &spec).await;
        }

        let written = self.publish(ctx, id, &spec).await?;
        info!(id, written, "Function reconciled");
        Ok(Self::output(ctx, id, &spec))
    }

    async fn delete(&self, ctx: &InvocationContext) -> Result<ResourceOutput> {
        let id = ctx.prior_id()?;
        remove(ctx, self.functions.as_ref(), id).await?;
        Ok(ResourceOutput::new(id))
    }
}
