//! S4: appraisal of the perceived context, then emotions, then dyadic emotions.

use std::collections::BTreeMap;

use contracts::{AtomBuilder, AtomError};
use serde_json::{json, Value};

use crate::atoms::{ids, round4, settled, AtomIndex, Inputs};
use crate::memory::recall;
use crate::proximity::relation_view;
use crate::stage::{Derivation, StageContext};

const SOURCE: &str = "appraisal";

pub const APPRAISALS: [&str; 6] = [
    "threat",
    "controllability",
    "blockage",
    "socialEval",
    "attachment",
    "loss",
];

pub const EMOTIONS: [&str; 6] = ["fear", "anger", "shame", "sadness", "joy", "care"];

struct Chain<'i, 'a> {
    index: &'i AtomIndex<'a>,
    self_id: &'i str,
    settled: BTreeMap<String, f64>,
    out: Derivation,
}

impl Chain<'_, '_> {
    fn read(&self, inputs: &mut Inputs, id: &str) -> f64 {
        match self.settled.get(id) {
            Some(value) => {
                inputs.push(id);
                *value
            }
            None => inputs.read(self.index, id),
        }
    }

    fn emit(&mut self, id: String, computed: f64, inputs: Inputs, parts: Value) -> Result<f64, AtomError> {
        let value = settled(self.index, &id, computed);
        self.settled.insert(id.clone(), value);
        if self.index.is_pinned(&id) {
            return Ok(value);
        }
        let mut builder = AtomBuilder::derived(id)
            .source(SOURCE)
            .subject(self.self_id.to_string())
            .magnitude(computed)
            .part("inputs", parts);
        builder = if inputs.is_empty() {
            builder.note("no appraisal inputs present")
        } else {
            builder.uses_all(inputs.into_ids())
        };
        self.out.push(builder.build()?);
        Ok(value)
    }
}

pub fn derive_appraisal(
    index: &AtomIndex<'_>,
    ctx: &StageContext<'_>,
) -> Result<Derivation, AtomError> {
    let self_id = ctx.agent_id;
    let mut chain = Chain {
        index,
        self_id,
        settled: BTreeMap::new(),
        out: Derivation::new(),
    };
    chain.out.qualifying = index.prefixed("ctx:").count();
    let app = |name: &str| ids::app(name, self_id);
    let emo = |name: &str| ids::emo(name, self_id);

    // appraisals
    let mut i = Inputs::new();
    let danger = chain.read(&mut i, "ctx:danger");
    let surveillance = chain.read(&mut i, "ctx:surveillance");
    let rival = chain.read(&mut i, &ids::prox("rival", self_id));
    let threat = 0.75 * danger + 0.25 * surveillance * danger + 0.2 * rival;
    let threat = chain.emit(
        app("threat"),
        threat,
        i,
        json!({ "danger": round4(danger), "surveillance": round4(surveillance), "rival": round4(rival) }),
    )?;

    let mut i = Inputs::new();
    let control = chain.read(&mut i, "ctx:control");
    let escape = chain.read(&mut i, "ctx:escape");
    let cover = chain.read(&mut i, "ctx:cover");
    let controllability = chain.emit(
        app("controllability"),
        0.5 * control + 0.3 * escape + 0.2 * cover,
        i,
        json!({ "control": round4(control), "escape": round4(escape), "cover": round4(cover) }),
    )?;

    let mut i = Inputs::new();
    let strict = chain.read(&mut i, "ctx:proceduralStrict");
    let scarcity = chain.read(&mut i, "ctx:scarcity");
    let pressure = chain.read(&mut i, "ctx:timePressure");
    let blockage = chain.emit(
        app("blockage"),
        0.4 * strict + 0.3 * scarcity + 0.3 * pressure,
        i,
        json!({ "proceduralStrict": round4(strict), "scarcity": round4(scarcity), "timePressure": round4(pressure) }),
    )?;

    let mut i = Inputs::new();
    let publicness = chain.read(&mut i, "ctx:publicness");
    let watched = chain.read(&mut i, "ctx:surveillance");
    let hierarchy = chain.read(&mut i, "ctx:hierarchy");
    let social_eval = chain.emit(
        app("socialEval"),
        (0.6 * publicness + 0.4 * watched) * (0.5 + 0.5 * hierarchy),
        i,
        json!({ "publicness": round4(publicness), "surveillance": round4(watched), "hierarchy": round4(hierarchy) }),
    )?;

    let mut i = Inputs::new();
    let intimacy = chain.read(&mut i, "ctx:intimacy");
    let ally = chain.read(&mut i, &ids::prox("ally", self_id));
    let attachment = chain.emit(
        app("attachment"),
        0.7 * intimacy + 0.3 * ally,
        i,
        json!({ "intimacy": round4(intimacy), "ally": round4(ally) }),
    )?;

    let mut i = Inputs::new();
    let memory = recall(index, self_id, None);
    for id in &memory.used {
        i.push(id);
    }
    let pain = chain.read(&mut i, &ids::feat_body(self_id, "pain"));
    let loss = chain.emit(
        app("loss"),
        0.6 * memory.harm + 0.4 * pain,
        i,
        json!({ "harm": round4(memory.harm), "pain": round4(pain) }),
    )?;

    // emotions
    let mut i = Inputs::new();
    for name in ["threat", "controllability"] {
        i.push(&app(name));
    }
    let fear = chain.emit(
        emo("fear"),
        threat * (1.0 - 0.6 * controllability),
        i,
        json!({ "threat": round4(threat), "controllability": round4(controllability) }),
    )?;

    let mut i = Inputs::new();
    for name in ["blockage", "loss", "controllability"] {
        i.push(&app(name));
    }
    let rival = chain.read(&mut i, &ids::prox("rival", self_id));
    let anger = chain.emit(
        emo("anger"),
        (0.5 * blockage + 0.5 * loss + 0.4 * rival) * (0.4 + 0.6 * controllability),
        i,
        json!({ "blockage": round4(blockage), "loss": round4(loss), "rival": round4(rival) }),
    )?;

    let mut i = Inputs::new();
    for name in ["socialEval", "blockage"] {
        i.push(&app(name));
    }
    chain.emit(
        emo("shame"),
        0.6 * social_eval * (0.3 + 0.7 * blockage),
        i,
        json!({ "socialEval": round4(social_eval), "blockage": round4(blockage) }),
    )?;

    let mut i = Inputs::new();
    for name in ["loss", "controllability", "attachment"] {
        i.push(&app(name));
    }
    chain.emit(
        emo("sadness"),
        0.7 * loss * (1.0 - controllability) + 0.2 * (1.0 - attachment) * loss,
        i,
        json!({ "loss": round4(loss), "attachment": round4(attachment) }),
    )?;

    let mut i = Inputs::new();
    for name in ["attachment", "threat", "controllability"] {
        i.push(&app(name));
    }
    chain.emit(
        emo("joy"),
        0.6 * attachment * (1.0 - threat) + 0.2 * controllability * (1.0 - threat),
        i,
        json!({ "attachment": round4(attachment), "threat": round4(threat) }),
    )?;

    let mut i = Inputs::new();
    i.push(&app("attachment"));
    i.push(&emo("fear"));
    let ally = chain.read(&mut i, &ids::prox("ally", self_id));
    chain.emit(
        emo("care"),
        (0.7 * attachment + 0.3 * ally) * (1.0 - 0.5 * fear),
        i,
        json!({ "attachment": round4(attachment), "ally": round4(ally), "fear": round4(fear) }),
    )?;

    // dyadic colouring of each known relationship
    let mut others: Vec<String> = index
        .prefixed(&ids::rel_base_prefix(self_id))
        .filter_map(|atom| atom.target.clone())
        .collect();
    others.dedup();
    for other_id in others {
        let relation = relation_view(index, self_id, &other_id);
        let by_other = recall(index, self_id, Some(&other_id));
        let armed_id = ids::obs_nearby(self_id, &other_id, "armed");
        let mut i = Inputs::new();
        let armed = i.read(index, &armed_id);
        for id in relation.used.iter().chain(by_other.used.iter()) {
            i.push(id);
        }
        i.push(&emo("fear"));
        i.push(&emo("anger"));
        let base = &relation.base;
        let shared = i.into_ids();

        let dyads = [
            (
                "fear",
                (0.6 * base.hostility + 0.4 * armed) * (0.5 + 0.5 * fear),
            ),
            (
                "anger",
                (0.7 * base.hostility + 0.3 * by_other.harm) * (0.5 + 0.5 * anger),
            ),
            (
                "affection",
                (0.6 * base.closeness + 0.4 * base.loyalty) * (1.0 - 0.5 * base.hostility),
            ),
        ];
        for (name, value) in dyads {
            let mut inputs = Inputs::new();
            for id in &shared {
                inputs.push(id);
            }
            let id = ids::emo_dyad(self_id, &other_id, name);
            chain.emit(id, value, inputs, json!({ "value": round4(value) }))?;
        }
    }

    Ok(chain.out)
}
