//! `linode_object_storage_key` - object storage access keys
//!
//! The secret key is disclosed once, in the create response. A key with
//! bucket grants is "limited"; the grant list is fixed at creation unless
//! the provider capability says otherwise.

use super::{Capabilities, Created, Kind, OpContext, ResourceKind, validate};
use crate::codec::{Tracked, put, record_id, required_str, tracked_str};
use crate::error::{Error, ProviderResultExt, Result, Subject};
use crate::grants::{self, Grant, GrantOp};
use converge::{
    AttrType, AttributeSchema, Attributes, FieldChange, ResourceDiff, ResourceSchema,
    ValidationError,
};
use linodekit::{
    BucketAccess, ObjectStorageKey, ObjectStorageKeyCreateOptions, ObjectStorageKeyUpdateOptions,
    Permission,
};
use serde_json::{Map, Value, json};

const GRANT_FIELDS: &[AttributeSchema] = &[
    AttributeSchema::required("bucket_name", AttrType::String),
    AttributeSchema::required("cluster", AttrType::String),
    AttributeSchema::required("permissions", AttrType::String),
];

const ID: AttributeSchema = AttributeSchema::computed("id", AttrType::Int);
const LABEL: AttributeSchema = AttributeSchema::required("label", AttrType::String);
const ACCESS_KEY: AttributeSchema = AttributeSchema::computed("access_key", AttrType::String);
const SECRET_KEY: AttributeSchema = AttributeSchema::computed("secret_key", AttrType::String)
    .sensitive()
    .write_once();
const LIMITED: AttributeSchema = AttributeSchema::computed("limited", AttrType::Bool);
const BUCKET_ACCESS: AttributeSchema =
    AttributeSchema::optional("bucket_access", AttrType::Blocks(GRANT_FIELDS)).force_new();

static SCHEMA: ResourceSchema = ResourceSchema {
    type_name: "linode_object_storage_key",
    attributes: &[ID, LABEL, ACCESS_KEY, SECRET_KEY, LIMITED, BUCKET_ACCESS],
};

/// Declared key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpec {
    pub label: String,
    /// Empty for an unlimited key
    pub bucket_access: Vec<BucketAccess>,
}

/// Recorded key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyState {
    pub id: u64,
    pub label: String,
    pub access_key: String,
    pub secret_key: Tracked<String>,
    pub limited: bool,
    pub bucket_access: Vec<BucketAccess>,
}

impl KeyState {
    fn from_remote(key: ObjectStorageKey) -> Self {
        Self {
            id: key.id,
            label: key.label,
            access_key: key.access_key,
            secret_key: Tracked::Unknown,
            limited: key.limited,
            bucket_access: key.bucket_access.unwrap_or_default(),
        }
    }
}

/// Marker for the object storage key kind.
pub struct ObjectStorageKeyResource;

impl ResourceKind for ObjectStorageKeyResource {
    type Spec = KeySpec;
    type State = KeyState;

    const KIND: Kind = Kind::ObjectStorageKey;

    fn schema() -> &'static ResourceSchema {
        &SCHEMA
    }

    fn decode(declared: &Attributes, subject: Subject) -> Result<KeySpec> {
        validate(&SCHEMA, declared, subject)?;
        let bucket_access = decode_grants(declared)
            .map_err(|e| Error::validation(subject, e))?;
        grants::check_unique(&bucket_access, BUCKET_ACCESS.name, subject)?;

        Ok(KeySpec {
            label: required_str(declared, LABEL.name, subject)?,
            bucket_access,
        })
    }

    fn decode_state(attrs: &Attributes) -> Result<KeyState> {
        let id = record_id(attrs, Self::KIND)?;
        let subject = Subject::new(Self::KIND, id);
        let bucket_access = decode_grants(attrs).map_err(|e| Error::validation(subject, e))?;

        Ok(KeyState {
            id,
            label: required_str(attrs, LABEL.name, subject)?,
            access_key: attrs.str(ACCESS_KEY.name).unwrap_or_default().to_string(),
            secret_key: tracked_str(attrs, SECRET_KEY.name),
            limited: attrs.bool(LIMITED.name).unwrap_or(!bucket_access.is_empty()),
            bucket_access,
        })
    }

    fn encode(state: &KeyState) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.set(ID.name, state.id);
        attrs.set(LABEL.name, state.label.clone());
        attrs.set(ACCESS_KEY.name, state.access_key.clone());
        put(&mut attrs, SECRET_KEY.name, &state.secret_key);
        attrs.set(LIMITED.name, state.limited);
        attrs.set(BUCKET_ACCESS.name, encode_grants(&state.bucket_access));
        attrs
    }

    fn id(state: &KeyState) -> u64 {
        state.id
    }

    fn diff(spec: &KeySpec, state: &KeyState, caps: Capabilities) -> ResourceDiff {
        let mut diff = ResourceDiff::new();
        diff.compare(&LABEL, Some(json!(state.label)), Some(json!(spec.label)));

        if !grants::plan(&spec.bucket_access, &state.bucket_access).is_empty() {
            diff.push(FieldChange {
                attribute: BUCKET_ACCESS.name.to_string(),
                from: Some(encode_grants(&state.bucket_access)),
                to: Some(encode_grants(&spec.bucket_access)),
                sensitive: false,
                force_new: grants::requires_replacement(
                    &spec.bucket_access,
                    &state.bucket_access,
                    caps,
                ),
            });
        }
        diff
    }

    fn carry_forward(prior: &KeyState, fresh: KeyState) -> KeyState {
        KeyState {
            secret_key: fresh.secret_key.or_carry(&prior.secret_key),
            ..fresh
        }
    }

    fn create(ctx: &OpContext<'_>, spec: &KeySpec) -> Result<Created<KeyState>> {
        let subject = Subject::unassigned(Self::KIND);
        ctx.check_cancelled(subject)?;

        let opts = ObjectStorageKeyCreateOptions {
            label: spec.label.clone(),
            bucket_access: (!spec.bucket_access.is_empty()).then(|| spec.bucket_access.clone()),
        };
        let mut created = ctx
            .client
            .create_object_storage_key(&opts)
            .for_subject(subject)?
            .normalize_secret();
        let subject = Subject::new(Self::KIND, created.id);

        // Only chance to learn the secret
        let secret_key = match created.secret_key.take() {
            Some(secret) => Tracked::Known(secret),
            None => {
                log::warn!("{subject}: create response carried no secret key");
                Tracked::Unknown
            }
        };
        log::info!("{subject}: created {}", created.access_key);

        match ctx.client.get_object_storage_key(created.id) {
            Ok(observed) => Ok(Created::read_back(KeyState {
                secret_key,
                ..KeyState::from_remote(observed)
            })),
            Err(e) => {
                log::warn!("{subject}: read after create failed: {e}");
                Ok(Created {
                    state: KeyState {
                        secret_key,
                        ..KeyState::from_remote(created)
                    },
                    read_error: Some(Error::provider(subject, e)),
                })
            }
        }
    }

    fn read(ctx: &OpContext<'_>, id: u64) -> Result<Option<KeyState>> {
        match ctx.client.get_object_storage_key(id) {
            Ok(key) => Ok(Some(KeyState::from_remote(key))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(Error::provider(Subject::new(Self::KIND, id), e)),
        }
    }

    fn update(ctx: &OpContext<'_>, spec: &KeySpec, prior: &KeyState) -> Result<KeyState> {
        let id = prior.id;
        let subject = Subject::new(Self::KIND, id);

        let observed = ctx.client.get_object_storage_key(id).for_subject(subject)?;
        let state = Self::carry_forward(prior, KeyState::from_remote(observed));
        let diff = Self::diff(spec, &state, ctx.capabilities);

        let replace = diff.replacement_attributes();
        if !replace.is_empty() {
            return Err(Error::ReplacementRequired {
                subject,
                attributes: replace,
            });
        }

        let mut changed = false;
        let grant_plan = grants::plan(&spec.bucket_access, &state.bucket_access);
        for op in grant_plan.ops() {
            let GrantOp::ReplaceList(list) = op;
            ctx.check_cancelled(subject)?;
            ctx.client.replace_bucket_access(id, &list).for_subject(subject)?;
            log::info!(
                "{subject}: replaced bucket access ({} added, {} revoked, {} changed)",
                grant_plan.to_create().len(),
                grant_plan.to_revoke().len(),
                grant_plan.to_update().len()
            );
            changed = true;
        }

        if diff.get(LABEL.name).is_some() {
            ctx.check_cancelled(subject)?;
            let opts = ObjectStorageKeyUpdateOptions {
                label: Some(spec.label.clone()),
            };
            ctx.client
                .update_object_storage_key(id, &opts)
                .for_subject(subject)?;
            log::info!("{subject}: updated label");
            changed = true;
        }

        if !changed {
            log::debug!("{subject}: no changes");
            return Ok(state);
        }

        let fresh = ctx.client.get_object_storage_key(id).for_subject(subject)?;
        Ok(Self::carry_forward(prior, KeyState::from_remote(fresh)))
    }

    fn delete(ctx: &OpContext<'_>, id: u64) -> Result<()> {
        let subject = Subject::new(Self::KIND, id);
        match ctx.client.delete_object_storage_key(id) {
            Ok(()) => {
                log::info!("{subject}: deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                log::debug!("{subject}: already gone");
                Ok(())
            }
            Err(e) => Err(Error::provider(subject, e)),
        }
    }
}

fn decode_grants(attrs: &Attributes) -> std::result::Result<Vec<BucketAccess>, ValidationError> {
    let Some(items) = attrs.objects(BUCKET_ACCESS.name) else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| decode_grant(i, item))
        .collect()
}

fn decode_grant(
    index: usize,
    item: &Map<String, Value>,
) -> std::result::Result<BucketAccess, ValidationError> {
    let field = |name: &str| -> std::result::Result<String, ValidationError> {
        item.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ValidationError::new(
                    format!("{}[{index}].{name}", BUCKET_ACCESS.name),
                    "required attribute is missing",
                )
            })
    };

    let raw = field("permissions")?;
    let permissions = Permission::parse(&raw).ok_or_else(|| {
        ValidationError::new(
            format!("{}[{index}].permissions", BUCKET_ACCESS.name),
            format!("expected one of none, read_only, read_write, got {raw:?}"),
        )
    })?;

    Ok(BucketAccess {
        bucket_name: field("bucket_name")?,
        cluster: field("cluster")?,
        permissions,
    })
}

/// Grants as attribute values, ordered by key.
fn encode_grants(list: &[BucketAccess]) -> Value {
    let mut list = list.to_vec();
    list.sort_by_key(Grant::key);
    Value::Array(
        list.iter()
            .map(|g| {
                json!({
                    "bucket_name": g.bucket_name,
                    "cluster": g.cluster,
                    "permissions": g.permissions.as_str(),
                })
            })
            .collect(),
    )
}
