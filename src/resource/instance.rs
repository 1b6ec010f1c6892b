//! `linode_instance` - compute instances
//!
//! The region is the placement attribute: a change is applied by migrating
//! the instance rather than by a field update. `root_pass` and
//! `authorized_keys` are sent on create and never returned, so they are
//! carried forward from the declaration and become unknown on import.

use super::{Capabilities, Created, Kind, OpContext, ResourceKind, validate};
use crate::codec::{
    Tracked, put, record_id, required_str, sorted, tracked_bool, tracked_str, tracked_strings,
};
use crate::error::{Error, ProviderResultExt, Result, Subject};
use crate::migration::Migration;
use converge::{
    AttrType, AttributeSchema, Attributes, FieldChange, ResourceDiff, ResourceSchema,
    ValidationError,
};
use linodekit::{
    Instance, InstanceCreateOptions, InstanceStatus, InstanceUpdateOptions, MigrationType,
};
use serde_json::{Value, json};

const STRINGS: AttrType = AttrType::List(&AttrType::String);

const ID: AttributeSchema = AttributeSchema::computed("id", AttrType::Int);
const STATUS: AttributeSchema = AttributeSchema::computed("status", AttrType::String);
const IPV4: AttributeSchema = AttributeSchema::computed("ipv4", STRINGS);
const LABEL: AttributeSchema = AttributeSchema::required("label", AttrType::String);
const REGION: AttributeSchema = AttributeSchema::required("region", AttrType::String);
const TYPE: AttributeSchema = AttributeSchema::required("type", AttrType::String).force_new();
const IMAGE: AttributeSchema = AttributeSchema::optional("image", AttrType::String).force_new();
const GROUP: AttributeSchema = AttributeSchema::optional("group", AttrType::String);
const TAGS: AttributeSchema = AttributeSchema::optional("tags", STRINGS);
const ROOT_PASS: AttributeSchema = AttributeSchema::optional("root_pass", AttrType::String)
    .sensitive()
    .write_only()
    .force_new();
const AUTHORIZED_KEYS: AttributeSchema = AttributeSchema::optional("authorized_keys", STRINGS)
    .write_only()
    .force_new();
const MIGRATION_TYPE: AttributeSchema =
    AttributeSchema::optional("migration_type", AttrType::String).write_only();
const BOOTED: AttributeSchema = AttributeSchema::optional("booted", AttrType::Bool).write_only();

static SCHEMA: ResourceSchema = ResourceSchema {
    type_name: "linode_instance",
    attributes: &[
        ID,
        STATUS,
        IPV4,
        LABEL,
        REGION,
        TYPE,
        IMAGE,
        GROUP,
        TAGS,
        ROOT_PASS,
        AUTHORIZED_KEYS,
        MIGRATION_TYPE,
        BOOTED,
    ],
};

/// Declared instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub label: String,
    pub region: String,
    pub instance_type: String,
    pub image: Option<String>,
    pub group: Option<String>,
    pub tags: Option<Vec<String>>,
    pub root_pass: Option<String>,
    pub authorized_keys: Option<Vec<String>>,
    pub migration_type: Option<MigrationType>,
    pub booted: Option<bool>,
}

/// Recorded instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceState {
    pub id: u64,
    pub label: String,
    pub region: String,
    pub instance_type: String,
    pub status: InstanceStatus,
    pub image: Option<String>,
    pub group: Option<String>,
    pub tags: Vec<String>,
    pub ipv4: Vec<String>,
    pub root_pass: Tracked<String>,
    pub authorized_keys: Tracked<Vec<String>>,
    pub migration_type: Tracked<MigrationType>,
    pub booted: Tracked<bool>,
}

impl InstanceState {
    /// State as a bare read sees it: write-only values are unknown.
    fn from_remote(instance: Instance) -> Self {
        Self {
            id: instance.id,
            label: instance.label,
            region: instance.region,
            instance_type: instance.instance_type,
            status: instance.status,
            image: instance.image,
            group: Some(instance.group).filter(|g| !g.is_empty()),
            tags: instance.tags,
            ipv4: instance.ipv4,
            root_pass: Tracked::Unknown,
            authorized_keys: Tracked::Unknown,
            migration_type: Tracked::Unknown,
            booted: Tracked::Unknown,
        }
    }
}

/// Marker for the instance kind.
pub struct InstanceResource;

impl ResourceKind for InstanceResource {
    type Spec = InstanceSpec;
    type State = InstanceState;

    const KIND: Kind = Kind::Instance;

    fn schema() -> &'static ResourceSchema {
        &SCHEMA
    }

    fn decode(declared: &Attributes, subject: Subject) -> Result<InstanceSpec> {
        validate(&SCHEMA, declared, subject)?;

        let migration_type = match declared.str(MIGRATION_TYPE.name) {
            None => None,
            Some(raw) => Some(MigrationType::parse(raw).ok_or_else(|| {
                Error::validation(
                    subject,
                    ValidationError::new(
                        MIGRATION_TYPE.name,
                        format!("expected \"cold\" or \"warm\", got {raw:?}"),
                    ),
                )
            })?),
        };

        Ok(InstanceSpec {
            label: required_str(declared, LABEL.name, subject)?,
            region: required_str(declared, REGION.name, subject)?,
            instance_type: required_str(declared, TYPE.name, subject)?,
            image: declared.str(IMAGE.name).map(str::to_string),
            group: declared.str(GROUP.name).map(str::to_string),
            tags: declared.strings(TAGS.name),
            root_pass: declared.str(ROOT_PASS.name).map(str::to_string),
            authorized_keys: declared
                .strings(AUTHORIZED_KEYS.name)
                .filter(|keys| !keys.is_empty()),
            migration_type,
            booted: declared.bool(BOOTED.name),
        })
    }

    fn decode_state(attrs: &Attributes) -> Result<InstanceState> {
        let id = record_id(attrs, Self::KIND)?;
        let subject = Subject::new(Self::KIND, id);
        Ok(InstanceState {
            id,
            label: required_str(attrs, LABEL.name, subject)?,
            region: required_str(attrs, REGION.name, subject)?,
            instance_type: required_str(attrs, TYPE.name, subject)?,
            status: attrs
                .str(STATUS.name)
                .map_or(InstanceStatus::Unknown, InstanceStatus::parse),
            image: attrs.str(IMAGE.name).map(str::to_string),
            group: attrs.str(GROUP.name).map(str::to_string),
            tags: attrs.strings(TAGS.name).unwrap_or_default(),
            ipv4: attrs.strings(IPV4.name).unwrap_or_default(),
            root_pass: tracked_str(attrs, ROOT_PASS.name),
            authorized_keys: tracked_strings(attrs, AUTHORIZED_KEYS.name),
            migration_type: match tracked_str(attrs, MIGRATION_TYPE.name) {
                Tracked::Known(raw) => Tracked::from_option(MigrationType::parse(&raw)),
                Tracked::Unknown => Tracked::Unknown,
                Tracked::Absent => Tracked::Absent,
            },
            booted: tracked_bool(attrs, BOOTED.name),
        })
    }

    fn encode(state: &InstanceState) -> Attributes {
        let mut attrs = Attributes::new();
        attrs.set(ID.name, state.id);
        attrs.set(LABEL.name, state.label.clone());
        attrs.set(REGION.name, state.region.clone());
        attrs.set(TYPE.name, state.instance_type.clone());
        attrs.set(STATUS.name, state.status.as_str());
        attrs.set_opt(IMAGE.name, state.image.clone());
        attrs.set_opt(GROUP.name, state.group.clone());
        attrs.set(TAGS.name, state.tags.clone());
        attrs.set(IPV4.name, state.ipv4.clone());
        put(&mut attrs, ROOT_PASS.name, &state.root_pass);
        put(&mut attrs, AUTHORIZED_KEYS.name, &state.authorized_keys);
        put(
            &mut attrs,
            MIGRATION_TYPE.name,
            &state.migration_type.map(|m| m.as_str().to_string()),
        );
        put(&mut attrs, BOOTED.name, &state.booted);
        attrs
    }

    fn id(state: &InstanceState) -> u64 {
        state.id
    }

    fn diff(spec: &InstanceSpec, state: &InstanceState, caps: Capabilities) -> ResourceDiff {
        let mut diff = ResourceDiff::new();
        diff.compare(&LABEL, Some(json!(state.label)), Some(json!(spec.label)));

        if caps.migration {
            diff.compare(&REGION, Some(json!(state.region)), Some(json!(spec.region)));
        } else {
            diff.compare(
                &REGION.force_new(),
                Some(json!(state.region)),
                Some(json!(spec.region)),
            );
        }

        diff.compare(
            &TYPE,
            Some(json!(state.instance_type)),
            Some(json!(spec.instance_type)),
        );

        if let Some(image) = &spec.image {
            diff.compare(&IMAGE, state.image.as_ref().map(|i| json!(i)), Some(json!(image)));
        }

        if let Some(group) = &spec.group {
            let declared = Some(group).filter(|g| !g.is_empty());
            diff.compare(
                &GROUP,
                state.group.as_ref().map(|g| json!(g)),
                declared.map(|g| json!(g)),
            );
        }

        if let Some(tags) = &spec.tags {
            diff.compare(&TAGS, Some(json!(sorted(&state.tags))), Some(json!(sorted(tags))));
        }

        if state.root_pass.conflicts_with(spec.root_pass.as_ref()) {
            diff.push(write_only_change(
                &ROOT_PASS,
                state.root_pass.known().map(|p| json!(p)),
                spec.root_pass.as_ref().map(|p| json!(p)),
            ));
        }

        let recorded_keys = match state.authorized_keys.map(|k| sorted(k)) {
            Tracked::Known(keys) if keys.is_empty() => Tracked::Absent,
            other => other,
        };
        let declared_keys = spec.authorized_keys.as_deref().map(sorted);
        if recorded_keys.conflicts_with(declared_keys.as_ref()) {
            diff.push(write_only_change(
                &AUTHORIZED_KEYS,
                recorded_keys.known().map(|k| json!(k)),
                declared_keys.map(|k| json!(k)),
            ));
        }

        diff
    }

    fn carry_forward(prior: &InstanceState, fresh: InstanceState) -> InstanceState {
        InstanceState {
            root_pass: fresh.root_pass.or_carry(&prior.root_pass),
            authorized_keys: fresh.authorized_keys.or_carry(&prior.authorized_keys),
            migration_type: fresh.migration_type.or_carry(&prior.migration_type),
            booted: fresh.booted.or_carry(&prior.booted),
            ..fresh
        }
    }

    fn create(ctx: &OpContext<'_>, spec: &InstanceSpec) -> Result<Created<InstanceState>> {
        let subject = Subject::unassigned(Self::KIND);
        ctx.check_cancelled(subject)?;

        let opts = InstanceCreateOptions {
            label: spec.label.clone(),
            region: spec.region.clone(),
            instance_type: spec.instance_type.clone(),
            image: spec.image.clone(),
            root_pass: spec.root_pass.clone(),
            authorized_keys: spec.authorized_keys.clone().unwrap_or_default(),
            group: spec.group.clone().unwrap_or_default(),
            tags: spec.tags.clone().unwrap_or_default(),
            booted: spec.booted,
        };
        let created = ctx.client.create_instance(&opts).for_subject(subject)?;
        let subject = Subject::new(Self::KIND, created.id);
        log::info!("{subject}: created in {}", created.region);

        let (remote, read_error) = match ctx.client.get_instance(created.id) {
            Ok(observed) => (observed, None),
            Err(e) => {
                log::warn!("{subject}: read after create failed: {e}");
                (created, Some(Error::provider(subject, e)))
            }
        };
        let state = InstanceState {
            root_pass: Tracked::from_option(spec.root_pass.clone()),
            authorized_keys: Tracked::from_option(spec.authorized_keys.clone()),
            migration_type: Tracked::from_option(spec.migration_type),
            booted: Tracked::from_option(spec.booted),
            ..InstanceState::from_remote(remote)
        };
        Ok(Created { state, read_error })
    }

    fn read(ctx: &OpContext<'_>, id: u64) -> Result<Option<InstanceState>> {
        match ctx.client.get_instance(id) {
            Ok(instance) => Ok(Some(InstanceState::from_remote(instance))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(Error::provider(Subject::new(Self::KIND, id), e)),
        }
    }

    fn update(
        ctx: &OpContext<'_>,
        spec: &InstanceSpec,
        prior: &InstanceState,
    ) -> Result<InstanceState> {
        let id = prior.id;
        let subject = Subject::new(Self::KIND, id);

        let mut observed = ctx.client.get_instance(id).for_subject(subject)?;
        let state = Self::carry_forward(prior, InstanceState::from_remote(observed.clone()));
        let diff = Self::diff(spec, &state, ctx.capabilities);

        let replace = diff.replacement_attributes();
        if !replace.is_empty() {
            return Err(Error::ReplacementRequired {
                subject,
                attributes: replace,
            });
        }

        let mode = spec.migration_type.unwrap_or(ctx.migration.default_mode);
        let mut migration =
            Migration::new(ctx.client, ctx.migration, ctx.cancel, id, &spec.region, mode);

        // A migration from an earlier run may still be in flight
        let mut changed = false;
        if observed.status == InstanceStatus::Migrating {
            observed = migration.resume()?;
            changed = true;
        }

        let opts = InstanceUpdateOptions {
            label: diff.get(LABEL.name).map(|_| spec.label.clone()),
            group: diff
                .get(GROUP.name)
                .map(|_| spec.group.clone().unwrap_or_default()),
            tags: diff.get(TAGS.name).and_then(|_| spec.tags.clone()),
        };
        if !opts.is_empty() {
            ctx.check_cancelled(subject)?;
            ctx.client.update_instance(id, &opts).for_subject(subject)?;
            log::info!("{subject}: updated {}", changed_fields(&diff, &[&LABEL, &GROUP, &TAGS]));
            changed = true;
        }

        if observed.region != spec.region {
            ctx.check_cancelled(subject)?;
            // The provider only accepts a migration from a settled status
            let current = if changed || !observed.status.is_settled() {
                migration.settle()?
            } else {
                observed
            };
            migration.run(&current)?;
            changed = true;
        }

        let state = if changed {
            let fresh = ctx.client.get_instance(id).for_subject(subject)?;
            Self::carry_forward(prior, InstanceState::from_remote(fresh))
        } else {
            log::debug!("{subject}: no changes");
            state
        };

        Ok(InstanceState {
            migration_type: match spec.migration_type {
                Some(m) => Tracked::Known(m),
                None => state.migration_type.clone(),
            },
            ..state
        })
    }

    fn delete(ctx: &OpContext<'_>, id: u64) -> Result<()> {
        let subject = Subject::new(Self::KIND, id);
        match ctx.client.delete_instance(id) {
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

fn write_only_change(attr: &AttributeSchema, from: Option<Value>, to: Option<Value>) -> FieldChange {
    FieldChange {
        attribute: attr.name.to_string(),
        from,
        to,
        sensitive: attr.sensitive,
        force_new: attr.force_new,
    }
}

fn changed_fields(diff: &ResourceDiff, attrs: &[&AttributeSchema]) -> String {
    attrs
        .iter()
        .filter(|a| diff.get(a.name).is_some())
        .map(|a| a.name)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> Subject {
        Subject::unassigned(Kind::Instance)
    }

    fn declared(value: Value) -> Attributes {
        Attributes::from_json(value)
    }

    fn spec() -> InstanceSpec {
        InstanceResource::decode(
            &declared(json!({
                "label": "web",
                "region": "us-east",
                "type": "g6-standard-1",
                "tags": ["b", "a"],
                "root_pass": "hunter2hunter2"
            })),
            subject(),
        )
        .unwrap()
    }

    fn state() -> InstanceState {
        InstanceState {
            id: 7,
            label: "web".into(),
            region: "us-east".into(),
            instance_type: "g6-standard-1".into(),
            status: InstanceStatus::Running,
            image: None,
            group: None,
            tags: vec!["a".into(), "b".into()],
            ipv4: vec!["192.0.2.8".into()],
            root_pass: Tracked::Known("hunter2hunter2".into()),
            authorized_keys: Tracked::Absent,
            migration_type: Tracked::Absent,
            booted: Tracked::Absent,
        }
    }

    const CAPS: Capabilities = Capabilities {
        grant_mutation: false,
        migration: true,
    };

    #[test]
    fn test_decode() {
        let spec = spec();
        assert_eq!(spec.label, "web");
        assert_eq!(spec.tags, Some(vec!["b".to_string(), "a".to_string()]));
        assert_eq!(spec.migration_type, None);
    }

    #[test]
    fn test_decode_rejects_bad_migration_type() {
        let err = InstanceResource::decode(
            &declared(json!({
                "label": "web", "region": "us-east", "type": "g6-standard-1",
                "migration_type": "hot"
            })),
            subject(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("migration_type"));
    }

    #[test]
    fn test_decode_rejects_computed_status() {
        let err = InstanceResource::decode(
            &declared(json!({
                "label": "web", "region": "us-east", "type": "g6-standard-1",
                "status": "running"
            })),
            subject(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_state_round_trip() {
        let state = InstanceState {
            authorized_keys: Tracked::Unknown,
            migration_type: Tracked::Known(MigrationType::Warm),
            ..state()
        };
        let decoded = InstanceResource::decode_state(&InstanceResource::encode(&state)).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_encode_omits_unknown_secret() {
        let state = InstanceState {
            root_pass: Tracked::Unknown,
            ..state()
        };
        let attrs = InstanceResource::encode(&state);
        assert!(attrs.is_unknown("root_pass"));
        assert!(attrs.to_json().get("root_pass").is_none());
    }

    #[test]
    fn test_no_diff_when_matching() {
        let diff = InstanceResource::diff(&spec(), &state(), CAPS);
        assert!(diff.is_empty(), "{diff:?}");
    }

    #[test]
    fn test_type_change_forces_replacement() {
        let mut spec = spec();
        spec.instance_type = "g6-standard-2".into();
        let diff = InstanceResource::diff(&spec, &state(), CAPS);
        assert_eq!(diff.replacement_attributes(), vec!["type"]);
    }

    #[test]
    fn test_region_change_is_in_place() {
        let mut spec = spec();
        spec.region = "us-west".into();
        let diff = InstanceResource::diff(&spec, &state(), CAPS);
        assert!(diff.get("region").is_some());
        assert!(!diff.requires_replacement());

        let fixed = Capabilities {
            migration: false,
            ..CAPS
        };
        let diff = InstanceResource::diff(&spec, &state(), fixed);
        assert_eq!(diff.replacement_attributes(), vec!["region"]);
    }

    #[test]
    fn test_root_pass_unknown_never_conflicts() {
        let state = InstanceState {
            root_pass: Tracked::Unknown,
            ..state()
        };
        assert!(InstanceResource::diff(&spec(), &state, CAPS).is_empty());
    }

    #[test]
    fn test_root_pass_change_is_masked() {
        let mut spec = spec();
        spec.root_pass = Some("another-password".into());
        let diff = InstanceResource::diff(&spec, &state(), CAPS);
        let change = diff.get("root_pass").unwrap();
        assert!(change.force_new);
        assert!(!change.to_string().contains("another-password"));
    }

    #[test]
    fn test_carry_forward_keeps_write_only() {
        let prior = state();
        let fresh = InstanceState {
            label: "renamed".into(),
            root_pass: Tracked::Unknown,
            authorized_keys: Tracked::Unknown,
            migration_type: Tracked::Unknown,
            booted: Tracked::Unknown,
            ..state()
        };
        let merged = InstanceResource::carry_forward(&prior, fresh);
        assert_eq!(merged.label, "renamed");
        assert_eq!(merged.root_pass, prior.root_pass);
        assert_eq!(merged.authorized_keys, Tracked::Absent);
    }
}
